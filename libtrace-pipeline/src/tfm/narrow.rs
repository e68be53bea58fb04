//! Emit a rectangular window of the upstream set.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

struct TfmNarrow {
    first_trace: usize,
    num_traces: usize,
    first_sample: usize,
    num_samples: usize,
}

impl Transform for TfmNarrow {
    fn name(&self) -> &'static str {
        "narrow"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let prev_shape = prev.shape();
        if self.first_trace + self.num_traces > prev_shape.num_traces
            || self.first_sample + self.num_samples > prev_shape.num_samples
        {
            return Err(LtError::invalid(
                "narrow window extends past the upstream set",
            ));
        }

        let mut shape = prev_shape.clone();
        shape.num_traces = self.num_traces;
        shape.num_samples = self.num_samples;
        Ok(NodeSeed::shaped(shape))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let t = prev.get_trace(index + self.first_trace)?;

        Ok(Record {
            title: t.title().map(|b| b.to_vec()),
            data: t.data().map(|b| b.to_vec()),
            samples: t
                .samples()
                .map(|s| s[self.first_sample..self.first_sample + self.num_samples].to_vec()),
        })
    }
}

pub fn tfm_narrow(
    first_trace: usize,
    num_traces: usize,
    first_sample: usize,
    num_samples: usize,
) -> Box<dyn Transform> {
    Box::new(TfmNarrow {
        first_trace,
        num_traces,
        first_sample,
        num_samples,
    })
}
