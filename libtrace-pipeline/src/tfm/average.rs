//! Summarize a whole set into one averaged trace.
use std::sync::Arc;

use libtrace_core::bitconverter::fit_title;
use libtrace_core::errors::*;
use libtrace_core::{Record, SampleCoding, SetShape};

use crate::graph::{NodeSeed, TraceSet, Transform};
use crate::stats::{Accumulator, Stat, STAT_AVG};

pub const PER_SAMPLE: bool = true;
pub const PER_TRACE: bool = false;

struct TfmAverage {
    per_sample: bool,
}

impl Transform for TfmAverage {
    fn name(&self) -> &'static str {
        "average"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let prev_shape = prev.shape();
        let num_samples = if self.per_sample {
            prev_shape.num_samples
        } else {
            prev_shape.num_traces
        };

        let shape = SetShape::new(1, num_samples, 8, 0, SampleCoding::Float, 1.0);
        Ok(NodeSeed::shaped(shape))
    }

    fn get(&self, ts: &Arc<TraceSet>, _index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let title = fit_title("Average", ts.shape().title_size);

        let samples = if self.per_sample {
            let mut acc = Accumulator::single_array(STAT_AVG, prev.num_samples());
            for i in 0..prev.num_traces() {
                let t = prev.get_trace(i)?;
                if let Some(samples) = t.samples() {
                    acc.accumulate_single_array(samples)?;
                }
            }
            acc.get_all(Stat::Avg)?
        } else {
            let mut acc = Accumulator::single(STAT_AVG);
            let mut result = vec![0.0f32; prev.num_traces()];
            for (i, res) in result.iter_mut().enumerate() {
                let t = prev.get_trace(i)?;
                if let Some(samples) = t.samples() {
                    acc.accumulate_single_many(samples)?;
                    *res = acc.get(Stat::Avg, 0)?;
                    acc.reset();
                }
            }
            result
        };

        Ok(Record {
            title: Some(title),
            data: None,
            samples: Some(samples),
        })
    }
}

pub fn tfm_average(per_sample: bool) -> Box<dyn Transform> {
    Box::new(TfmAverage { per_sample })
}
