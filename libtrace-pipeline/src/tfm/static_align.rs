//! Static alignment against a reference trace.
//!
//! For each trace, find the single integer shift within `±max_shift` that
//! maximizes absolute Pearson correlation against the reference over the
//! configured sample regions, and emit a circularly shifted copy when the
//! peak confidence clears the threshold.
use std::sync::Arc;

use log::warn;

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};
use crate::stats::{Accumulator, Stat, STAT_PEARSON};

struct TfmStaticAlign {
    confidence: f64,
    max_shift: usize,
    ref_trace: usize,
    regions: Vec<(usize, usize)>,
}

impl TfmStaticAlign {
    /// Best |Pearson| and its shift, or `None` when the trace has no samples.
    fn align(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Option<(f64, isize)>> {
        let prev = ts.prev().unwrap();
        let num_samples = ts.num_samples();
        let window = 2 * self.max_shift;

        let curr = prev.get_trace(index)?;
        let curr_samples = match curr.samples() {
            Some(s) => s,
            None => return Ok(None),
        };

        let reference = prev.get_trace(self.ref_trace)?;
        let ref_samples = reference
            .samples()
            .ok_or_else(|| LtError::invalid("no samples for reference trace"))?;

        let mut acc = Accumulator::dual_array(STAT_PEARSON, window, 1);
        let mut temp = vec![0.0f32; window];

        let mut shift_valid_lower = 0usize;
        let mut shift_valid_upper = window;

        for &(lower, upper) in &self.regions {
            for i in lower..upper {
                if i < self.max_shift {
                    shift_valid_lower = shift_valid_lower.max(self.max_shift - i);
                }
                if i + self.max_shift >= num_samples {
                    shift_valid_upper =
                        shift_valid_upper.min(num_samples - i + self.max_shift);
                }

                temp.iter_mut().for_each(|v| *v = 0.0);
                for j in shift_valid_lower..shift_valid_upper {
                    temp[j] = curr_samples[i + j - self.max_shift];
                }

                acc.accumulate_dual_array(&temp, &ref_samples[i..i + 1])?;
            }
        }

        let pearson = acc.get_all(Stat::Pearson)?;
        let mut best_conf = 0.0f64;
        let mut best_shift = 0isize;
        for (j, p) in pearson
            .iter()
            .enumerate()
            .take(shift_valid_upper)
            .skip(shift_valid_lower)
        {
            if (p.abs() as f64) > best_conf {
                best_conf = p.abs() as f64;
                best_shift = j as isize - self.max_shift as isize;
            }
        }

        Ok(Some((best_conf, best_shift)))
    }
}

impl Transform for TfmStaticAlign {
    fn name(&self) -> &'static str {
        "static_align"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let shape = prev.shape();
        for &(lower, upper) in &self.regions {
            if lower >= upper || upper > shape.num_samples {
                return Err(LtError::invalid("bad alignment reference region"));
            }
        }

        Ok(NodeSeed::shaped(shape.clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let (best_conf, best_shift) = match self.align(ts, index)? {
            Some(found) => found,
            None => return Ok(Record::empty()),
        };

        if index % 1000 == 0 {
            warn!(
                "trace {}, best confidence {} for shift {}",
                index, best_conf, best_shift
            );
        }

        let prev = ts.prev().unwrap();
        let t = prev.get_trace(index)?;
        let samples = if best_conf >= self.confidence {
            let shift = t
                .samples()
                .ok_or_else(|| LtError::not_found("trace lost its samples during alignment"))?;
            let n = shift.len();

            let mut result = vec![0.0f32; n];
            let s = best_shift.rem_euclid(n as isize) as usize;
            result[..n - s].copy_from_slice(&shift[s..]);
            result[n - s..].copy_from_slice(&shift[..s]);
            Some(result)
        } else {
            None
        };

        Ok(Record {
            title: t.title().map(|b| b.to_vec()),
            data: t.data().map(|b| b.to_vec()),
            samples,
        })
    }
}

pub fn tfm_static_align(
    confidence: f64,
    max_shift: usize,
    ref_trace: usize,
    regions: Vec<(usize, usize)>,
) -> Box<dyn Transform> {
    Box::new(TfmStaticAlign {
        confidence,
        max_shift,
        ref_trace,
        regions,
    })
}
