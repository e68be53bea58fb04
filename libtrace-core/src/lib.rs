//! This library is the foundation for the `libtrace-backends` and
//! `libtrace-pipeline` crates. It holds the data model shared by every stage
//! of a side-channel analysis pipeline (trace records, set shapes, sample
//! encodings), the bit-exact TRS TLV header codec, and the raw sample
//! conversion routines. It can be built either with serialization support or
//! in a slightly more lightweight manner without it (see features).
#![allow(clippy::derive_partial_eq_without_eq)]
extern crate num;
#[macro_use]
extern crate num_derive;
extern crate tinyvec;

#[cfg(any(feature = "to_json", feature = "serde"))]
extern crate serde;
#[cfg(feature = "to_json")]
extern crate serde_json;

pub mod bitconverter;
pub mod enums;
pub mod errors;
pub mod header_structs;
#[cfg(test)]
mod tests;

pub use errors::{LtError, Result};

pub use enums::*;
pub use header_structs::*;

/// Provisional trace count for sets whose length is only known once the
/// producing transformation signals end-of-stream.
pub const UNKNOWN_NUM_TRACES: usize = usize::MAX;

/// Default `TITLE_SPACE` when the header is absent.
pub const DEFAULT_TITLE_SIZE: usize = 255;

/// One materialized capture record: title, associated data, samples.
///
/// Any of the three payload fields may be absent, which the pipeline
/// interprets as "this index is not present in the output" (a silent drop).
/// Samples are always held post-processed as `f32`, independent of the
/// on-disk encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub title: Option<Vec<u8>>,
    pub data: Option<Vec<u8>>,
    pub samples: Option<Vec<f32>>,
}

impl Record {
    /// A record with every payload absent -- the no-op record.
    pub fn empty() -> Self {
        Record::default()
    }

    /// True when every payload field is absent.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.data.is_none() && self.samples.is_none()
    }

    /// The title truncated at its first NUL, as UTF-8 (lossy).
    pub fn title_str(&self) -> Option<String> {
        self.title
            .as_deref()
            .map(bitconverter::ascii_bytes_to_string)
    }
}

/// The per-trace shape of a set: how many records it holds and how each
/// record is laid out.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SetShape {
    /// Total record count; may be [`UNKNOWN_NUM_TRACES`] until finalized.
    pub num_traces: usize,
    pub num_samples: usize,
    pub title_size: usize,
    pub data_size: usize,
    pub coding: SampleCoding,
    pub yscale: f32,
    /// Offset/length of the input bytes inside the associated data, if the
    /// headers declared them.
    pub input: Option<(usize, usize)>,
    /// Offset/length of the output bytes inside the associated data.
    pub output: Option<(usize, usize)>,
    /// Offset/length of the key bytes inside the associated data.
    pub key: Option<(usize, usize)>,
}

impl SetShape {
    pub fn new(
        num_traces: usize,
        num_samples: usize,
        title_size: usize,
        data_size: usize,
        coding: SampleCoding,
        yscale: f32,
    ) -> Self {
        SetShape {
            num_traces,
            num_samples,
            title_size,
            data_size,
            coding,
            yscale,
            input: None,
            output: None,
            key: None,
        }
    }

    /// Byte length of one on-disk record: `title ‖ data ‖ samples`.
    pub fn trace_length(&self) -> usize {
        self.title_size + self.data_size + self.num_samples * self.coding.datum_byte_length()
    }

    /// In-memory footprint of one materialized record, used for cache sizing.
    pub fn trace_size(&self) -> usize {
        self.title_size
            + self.data_size
            + self.num_samples * std::mem::size_of::<f32>()
            + std::mem::size_of::<Record>()
    }
}
