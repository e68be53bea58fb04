//! The identity transformation.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

struct TfmNop;

impl Transform for TfmNop {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        passthrough(ts, index)
    }
}

pub fn tfm_nop() -> Box<dyn Transform> {
    Box::new(TfmNop)
}
