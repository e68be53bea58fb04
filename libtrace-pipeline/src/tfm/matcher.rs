//! Sliding Pearson of each trace against a fixed reference pattern.
//!
//! Emits the |Pearson| curve and logs a spacing report: confident local
//! maxima, the mean/deviation of their gaps, and how cleanly the outlier
//! gaps divide by the mean spacing.
use std::sync::Arc;

use log::{info, warn};

use libtrace_core::errors::*;
use libtrace_core::{Record, SampleCoding};

use crate::graph::{NodeSeed, TraceSet, Transform};
use crate::stats::pattern::PatternMatcher;
use crate::stats::{Accumulator, Stat, STAT_AVG, STAT_DEV};

use super::MatchRegion;

struct TfmMatch {
    first: MatchRegion,
    last: MatchRegion,
    pattern: MatchRegion,
    avg_len: usize,
    max_dev: usize,
}

impl Transform for TfmMatch {
    fn name(&self) -> &'static str {
        "match"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let num_samples = prev.shape().num_samples;
        for region in [&self.first, &self.last, &self.pattern] {
            if region.is_empty() || region.upper > num_samples {
                return Err(LtError::invalid("bad match region"));
            }
        }

        let mut shape = prev.shape().clone();
        shape.num_samples = prev.shape().num_samples - self.pattern.len();
        shape.coding = SampleCoding::Float;
        shape.yscale = 1.0;
        Ok(NodeSeed::shaped(shape))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();

        let reference = prev.get_trace(self.pattern.ref_trace)?;
        let t = prev.get_trace(index)?;

        let (ref_samples, samples) = match (reference.samples(), t.samples()) {
            (Some(r), Some(s)) => (r, s),
            _ => return Ok(Record::empty()),
        };

        let matcher =
            PatternMatcher::new(ref_samples[self.pattern.lower..self.pattern.upper].to_vec())?;
        let mut pearson = matcher.pearson(samples)?;
        pearson.iter_mut().for_each(|v| *v = v.abs());

        self.report_gaps(index, &pearson)?;

        Ok(Record {
            title: t.title().map(|b| b.to_vec()),
            data: t.data().map(|b| b.to_vec()),
            samples: Some(pearson),
        })
    }
}

impl TfmMatch {
    fn report_gaps(&self, index: usize, pearson: &[f32]) -> Result<()> {
        let confidence = self.pattern.confidence as f32;
        let maxima: Vec<usize> = (1..pearson.len().saturating_sub(1))
            .filter(|&i| {
                pearson[i] >= confidence
                    && pearson[i - 1] < pearson[i]
                    && pearson[i + 1] < pearson[i]
            })
            .collect();

        // known spacings first, so gap predictions have a reference mean
        let mut acc = Accumulator::single(STAT_AVG | STAT_DEV);
        let mut count_true = 0usize;
        for pair in maxima.windows(2) {
            let gap = pair[1] - pair[0];
            if gap >= self.avg_len - self.max_dev && gap < self.avg_len + self.max_dev {
                count_true += 1;
                acc.accumulate_single(gap as f32)?;
            }
        }

        if acc.count() < 2 {
            info!("trace {}: too few confident matches for a gap report", index);
            return Ok(());
        }

        let mean = acc.get(Stat::Avg, 0)?;
        let dev = acc.get(Stat::Dev, 0)?;

        let mut count_found = 0usize;
        let mut max_diff_from_whole = 0.0f32;
        for pair in maxima.windows(2) {
            let gap = pair[1] - pair[0];
            if gap < self.avg_len - self.max_dev || gap >= self.avg_len + self.max_dev {
                let ratio = gap as f32 / mean;
                let diff = (ratio - ratio.round()).abs();
                max_diff_from_whole = max_diff_from_whole.max(diff);

                if diff <= 0.1 {
                    count_found += ratio.round() as usize;
                } else {
                    info!(
                        "trace {}: rejecting gap from {} to {}",
                        index, pair[0], pair[1]
                    );
                }
            }
        }

        warn!(
            "trace {}: count {} mean {} dev {}, max diff {}",
            index,
            count_true + count_found,
            mean,
            dev,
            max_diff_from_whole
        );
        Ok(())
    }
}

pub fn tfm_match(
    first: MatchRegion,
    last: MatchRegion,
    pattern: MatchRegion,
    avg_len: usize,
    max_dev: usize,
) -> Result<Box<dyn Transform>> {
    if first.ref_trace != last.ref_trace || first.ref_trace != pattern.ref_trace {
        return Err(LtError::invalid(
            "first, last, and pattern need to share a ref trace",
        ));
    }

    Ok(Box::new(TfmMatch {
        first,
        last,
        pattern,
        avg_len,
        max_dev,
    }))
}
