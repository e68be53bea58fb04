//! Split a TVLA capture into its fixed or random half.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

const STR_FIXED: &[u8] = b"TVLA set Fixed";
const STR_RAND: &[u8] = b"TVLA set Random";

pub const TVLA_FIXED: bool = true;
pub const TVLA_RANDOM: bool = false;

struct TfmSplitTvla {
    which: bool,
}

fn trace_type(title: &[u8]) -> Result<bool> {
    if title.starts_with(STR_FIXED) {
        Ok(TVLA_FIXED)
    } else if title.starts_with(STR_RAND) {
        Ok(TVLA_RANDOM)
    } else {
        Err(LtError::invalid(
            "invalid trace title, not a TVLA dataset?",
        ))
    }
}

impl Transform for TfmSplitTvla {
    fn name(&self) -> &'static str {
        "split_tvla"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn trace_size(&self, ts: &TraceSet) -> usize {
        // about half the time, we won't actually be storing samples
        let shape = ts.shape();
        shape.title_size + shape.data_size + (shape.num_samples / 2) * std::mem::size_of::<f32>()
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let matched = {
            let t = prev.get_trace(index)?;
            match t.title() {
                Some(title) => trace_type(title)? == self.which,
                None => false,
            }
        };

        if matched {
            passthrough(ts, index)
        } else {
            Ok(Record::empty())
        }
    }
}

pub fn tfm_split_tvla(which: bool) -> Box<dyn Transform> {
    Box::new(TfmSplitTvla { which })
}
