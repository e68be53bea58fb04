//! Concatenate another trace set after the upstream one.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

struct TfmAppend {
    spec: String,
    other: Option<Arc<TraceSet>>,
}

impl Transform for TfmAppend {
    fn name(&self) -> &'static str {
        "append"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let pipeline = prev
            .pipeline()
            .ok_or_else(|| LtError::invalid("pipeline already torn down"))?;
        let other = pipeline.open(&self.spec)?;

        let a = prev.shape();
        let b = other.shape();
        if a.num_traces == libtrace_core::UNKNOWN_NUM_TRACES {
            return Err(LtError::invalid(
                "cannot append to a set of provisional length",
            ));
        }
        if a.num_samples != b.num_samples
            || a.title_size != b.title_size
            || a.data_size != b.data_size
            || a.coding != b.coding
        {
            return Err(LtError::invalid(
                "incompatible trace sets: mismatch in sizes",
            ));
        }
        if a.yscale != b.yscale {
            return Err(LtError::invalid(
                "incompatible trace sets: mismatch in y-scale",
            ));
        }

        let mut shape = a.clone();
        shape.num_traces = a.num_traces + b.num_traces;

        self.other = Some(other);
        Ok(NodeSeed::shaped(shape))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let boundary = prev.num_traces();

        if index < boundary {
            passthrough(ts, index)
        } else {
            let other = self.other.as_ref().unwrap();
            let t = other.get_trace(index - boundary)?;
            Ok(t.record().clone())
        }
    }
}

pub fn tfm_append<S: Into<String>>(spec: S) -> Box<dyn Transform> {
    Box::new(TfmAppend {
        spec: spec.into(),
        other: None,
    })
}
