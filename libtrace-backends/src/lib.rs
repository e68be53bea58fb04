//! Byte-level readers and writers for persisted trace sets.
//!
//! A backend owns one capture file (or one remote endpoint) and exposes a
//! uniform record interface to the pipeline above it. Three variants exist,
//! chosen by the textual prefix of the source string:
//!
//! - `trs <path>` -- the raw TLV+payload format,
//! - `ztrs <path>` -- like `trs` but with zlib-deflated, doubly-framed
//!   per-trace payloads, so records must be walked rather than indexed,
//! - `net <ip> <port>` -- a request/response client over a stream socket,
//!   one connection per read.
//!
//! Reads decode raw samples to scaled `f32`; writes apply the inverse scale
//! before the cast. Writes are strictly sequential: a trace set is produced
//! once, in order, and never edited in place.
extern crate libtrace_core;

pub mod net;
pub mod secure;
pub mod trs;
pub mod ztrs;
#[cfg(test)]
mod integration_tests;

pub use libtrace_core::errors::*;
pub use libtrace_core::{Record, SetShape, TraceHeader};

/// The record-level interface every backend provides.
///
/// `read` and `write` operate on whole records; encoding and scaling of the
/// sample array according to the set's datatype and y-scale happen inside the
/// backend. Writers accept only the next sequential index.
pub trait Backend: Send + Sync {
    /// The shape parsed from (or assigned to) this set.
    fn shape(&self) -> &SetShape;

    /// The full header list, for sets that inherit headers downstream.
    fn headers(&self) -> &[TraceHeader];

    /// Materialize the record at `index`.
    fn read(&self, index: usize) -> Result<Record>;

    /// Append the record at `index`; out-of-order writes are `Invalid`.
    fn write(&self, index: usize, rec: &Record) -> Result<()>;

    /// Rewrite `NUMBER_TRACES` to the actual produced count.
    fn finalize(&self, num_traces: usize) -> Result<()>;
}

fn split_spec(spec: &str) -> Result<(&str, &str)> {
    spec.split_once(char::is_whitespace)
        .map(|(prefix, rest)| (prefix, rest.trim_start()))
        .ok_or_else(|| LtError::invalid(format!("malformed backend source string: {}", spec)))
}

/// Open an existing set for reading.
pub fn open_backend(spec: &str) -> Result<Box<dyn Backend>> {
    let (prefix, rest) = split_spec(spec)?;
    match prefix {
        "trs" => Ok(Box::new(trs::TrsBackend::open(rest)?)),
        "ztrs" => Ok(Box::new(ztrs::ZtrsBackend::open(rest)?)),
        "net" => Ok(Box::new(net::NetBackend::open(rest)?)),
        _ => Err(LtError::invalid(format!(
            "couldn't find a backend for {}",
            prefix
        ))),
    }
}

/// Create a new empty set for writing, inheriting `extras` from an upstream.
pub fn create_backend(
    spec: &str,
    shape: &SetShape,
    extras: &[TraceHeader],
) -> Result<Box<dyn Backend>> {
    let (prefix, rest) = split_spec(spec)?;
    match prefix {
        "trs" => Ok(Box::new(trs::TrsBackend::create(rest, shape, extras)?)),
        "ztrs" => Ok(Box::new(ztrs::ZtrsBackend::create(rest, shape, extras)?)),
        "net" => Err(LtError::invalid(
            "creating a network backend is invalid -- needs to be opened",
        )),
        _ => Err(LtError::invalid(format!(
            "couldn't find a backend for {}",
            prefix
        ))),
    }
}
