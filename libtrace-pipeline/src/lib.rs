//! The transformation pipeline at the heart of the libtrace toolkit.
//!
//! A pipeline is a lazy, pull-driven DAG of trace sets. Source nodes read a
//! capture file through a backend; derived nodes carry a transformation that
//! produces records on demand from their upstream node. Sinks (render,
//! export, save, visualize) drive the pull from the downstream end, usually
//! with a pool of worker threads, and a per-node set-associative cache
//! amortizes repeated materialization.
//!
//! ```no_run
//! use libtrace_pipeline::{Pipeline, tfm};
//! use libtrace_pipeline::sink::render;
//!
//! # fn main() -> libtrace_core::Result<()> {
//! let pipeline = Pipeline::new();
//! let source = pipeline.open("trs /tmp/captures.trs")?;
//! let aligned = pipeline.transform(
//!     &source,
//!     tfm::static_align::tfm_static_align(0.9, 10, 0, vec![(40, 60)]),
//! )?;
//! let saved = pipeline.transform(&aligned, tfm::save::tfm_save("trs /tmp/aligned.trs"))?;
//! render(&saved, 4)?;
//! pipeline.shutdown();
//! # Ok(())
//! # }
//! ```
extern crate fnv;
extern crate libtrace_backends;
extern crate libtrace_core;
extern crate log;
extern crate parking_lot;

pub mod cache;
pub mod config;
pub mod crypto;
pub mod graph;
pub mod sem;
pub mod sink;
pub mod stats;
pub mod tfm;
#[cfg(test)]
mod integration_tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub use graph::{Trace, TraceRef, TraceSet, Transform};
pub use libtrace_core::errors::{LtError, Result};
pub use libtrace_core::{Record, SetShape, UNKNOWN_NUM_TRACES};

/// Owner of the process-wide counters and of every node built for one run.
///
/// Created once by the driver; nodes hold a weak reference back so that
/// transformations which open auxiliary sets (`append`) can register them for
/// teardown.
pub struct Pipeline {
    next_set_id: AtomicUsize,
    next_cache_id: AtomicUsize,
    sets: Mutex<Vec<Arc<TraceSet>>>,
}

impl Pipeline {
    pub fn new() -> Arc<Pipeline> {
        Arc::new(Pipeline {
            next_set_id: AtomicUsize::new(0),
            next_cache_id: AtomicUsize::new(0),
            sets: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn take_set_id(&self) -> usize {
        self.next_set_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn take_cache_id(&self) -> usize {
        self.next_cache_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, set: Arc<TraceSet>) {
        self.sets.lock().push(set);
    }

    /// Open a source trace set from a backend source string.
    pub fn open(self: &Arc<Self>, spec: &str) -> Result<Arc<TraceSet>> {
        graph::ts_open(self, spec)
    }

    /// Attach a transformation to `prev`, creating a derived trace set.
    ///
    /// No upstream record is touched here; the first upstream access happens
    /// on the first `get_trace` of the new node.
    pub fn transform(
        self: &Arc<Self>,
        prev: &Arc<TraceSet>,
        tfm: Box<dyn Transform>,
    ) -> Result<Arc<TraceSet>> {
        graph::ts_transform(self, prev, tfm)
    }

    /// Tear the pipeline down: transformation exit hooks run in reverse
    /// creation order so downstream commit threads drain before their
    /// upstreams disappear.
    pub fn shutdown(&self) {
        let sets = {
            let mut guard = self.sets.lock();
            std::mem::take(&mut *guard)
        };

        for set in sets.iter().rev() {
            set.close();
        }
    }
}
