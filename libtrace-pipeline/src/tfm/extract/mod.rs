//! Segment long captures into per-operation sub-traces.
//!
//! Each input record carries, after the usual cryptographic bytes, a vector
//! of `expecting` capture timestamps. The kernel correlates the record
//! against a reference pattern, walks the match/gap/tail searches over the
//! Pearson vector, and emits one `pattern_size`-sample trace per detected
//! placement with the cryptographic data reattached.
pub mod search;

use std::collections::VecDeque;
use std::convert::TryInto;
use std::sync::Arc;

use log::{error, warn};
use parking_lot::Mutex;

use libtrace_core::bitconverter::fit_title;
use libtrace_core::errors::*;
use libtrace_core::{CryptoKind, Port, Record, SampleCoding, SetShape};

use crate::graph::{Trace, TraceSet, Transform};
use crate::stats::pattern::PatternMatcher;
use crate::stats::{Accumulator, Stat, STAT_AVG, STAT_DEV};

use self::search::{
    optimize_gaps, search_gaps, search_matches, search_tail, Reference, SearchConfig, SplitKind,
};
use super::block::{tfm_block, BlockConsumer, BlockShape, Completion};
use super::MatchRegion;

const DEBUG_TITLE_SIZE: usize = 128;
const CRYPTO_DATA_SIZE: usize = 48; // pt, ct, key

struct SharedReference {
    matcher: PatternMatcher,
    reference: Reference,
}

pub struct ExtractBlock {
    index: usize,
    data: Vec<u8>,
    samples: Vec<f32>,
    positions: VecDeque<usize>,

    // debug tracks for the waiter port
    pearson: Option<Vec<f32>>,
    matches: Option<Vec<f32>>,
    timing: Option<Vec<f32>>,
    debug_sent: bool,
}

struct ExtractTiming {
    pattern_size: usize,
    expecting: usize,
    pattern: MatchRegion,
    cfg: SearchConfig,
    crypto: CryptoKind,

    shared: Mutex<Option<SharedReference>>,
    debugging: Mutex<bool>,
}

impl ExtractTiming {
    /// Derive the match pattern and its spacing statistics from the
    /// reference trace, once, under the config lock.
    fn process_ref_trace(&self, prev: &Arc<TraceSet>) -> Result<SharedReference> {
        let t = prev.get_trace(self.pattern.ref_trace)?;
        let samples = t
            .samples()
            .ok_or_else(|| LtError::invalid("reference trace has no samples"))?;

        if self.pattern.upper > samples.len() || self.pattern.is_empty() {
            return Err(LtError::invalid("bad extraction pattern region"));
        }

        let matcher =
            PatternMatcher::new(samples[self.pattern.lower..self.pattern.upper].to_vec())?;

        // spacing statistics come from matching the reference against itself
        let mut pearson = matcher.pearson(samples)?;
        pearson.iter_mut().for_each(|v| *v = v.abs());
        let found = search_matches(&pearson, &self.cfg);

        let mut acc = Accumulator::single(STAT_AVG | STAT_DEV);
        let confident: Vec<usize> = found.entries.iter().map(|e| e.index).collect();
        for pair in confident.windows(2) {
            let gap = pair[1] - pair[0];
            if gap >= self.cfg.avg_len - self.cfg.max_dev
                && gap < self.cfg.avg_len + self.cfg.max_dev
            {
                acc.accumulate_single(gap as f32)?;
            }
        }

        let reference = if acc.count() >= 2 {
            Reference {
                mean: acc.get(Stat::Avg, 0)?,
                dev: acc.get(Stat::Dev, 0)?.max(f32::EPSILON),
            }
        } else {
            Reference {
                mean: self.cfg.avg_len as f32,
                dev: (self.cfg.max_dev as f32 / search::ZCONF_95).max(1.0),
            }
        };

        warn!(
            "extraction reference ready: mean spacing {}, dev {}",
            reference.mean, reference.dev
        );

        Ok(SharedReference { matcher, reference })
    }

    fn timings(&self, data: &[u8]) -> Vec<u64> {
        (0..self.expecting)
            .map(|i| {
                let off = 32 + 8 * i;
                u64::from_le_bytes(data[off..off + 8].try_into().unwrap())
            })
            .collect()
    }
}

impl BlockConsumer for ExtractTiming {
    type Block = ExtractBlock;

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<BlockShape> {
        let normal_datasize = match self.crypto {
            CryptoKind::Aes128 => CRYPTO_DATA_SIZE,
        };

        let prev_shape = prev.shape();
        if prev_shape.data_size != normal_datasize + self.expecting * 8 {
            return Err(LtError::invalid(
                "invalid data size in previous set -- no timing data?",
            ));
        }

        Ok(BlockShape {
            num_samples: self.pattern_size,
            data_size: normal_datasize,
            coding: prev_shape.coding,
            yscale: prev_shape.yscale,
        })
    }

    fn init_waiter(
        &self,
        shape: &mut SetShape,
        port: Port,
        producer: &Arc<TraceSet>,
    ) -> Result<()> {
        if port != Port::ExtractTimingDebug {
            return Err(LtError::invalid("invalid port for pattern extraction"));
        }

        let upstream = producer
            .prev()
            .ok_or_else(|| LtError::invalid("extraction node without an upstream"))?;

        shape.title_size = DEBUG_TITLE_SIZE;
        shape.data_size = 0;
        shape.coding = SampleCoding::Byte;
        shape.yscale = 1.0 / 127.0;
        shape.num_traces = 3 * upstream.shape().num_traces;
        shape.num_samples = upstream.shape().num_samples - self.pattern.len();

        *self.debugging.lock() = true;
        Ok(())
    }

    fn initialize(&self, t: &Trace) -> Result<Self::Block> {
        let data = t.data().expect("interesting checked data");
        let samples = t.samples().expect("interesting checked samples");

        let mut kept = Vec::with_capacity(CRYPTO_DATA_SIZE);
        kept.extend_from_slice(&data[0..32]);
        kept.extend_from_slice(&data[32 + 8 * self.expecting..32 + 8 * self.expecting + 16]);

        Ok(ExtractBlock {
            index: t.index(),
            data: kept,
            samples: samples.to_vec(),
            positions: VecDeque::new(),
            pearson: None,
            matches: None,
            timing: None,
            debug_sent: false,
        })
    }

    fn interesting(&self, t: &Trace) -> bool {
        t.samples().is_some() && t.data().is_some()
    }

    fn matches(&self, _t: &Trace, _block: &Self::Block) -> bool {
        // each trace in its own block -- also enforced by Completion::Singular
        false
    }

    fn accumulate(&self, t: &Trace, block: &mut Self::Block) -> Result<()> {
        let (matcher, reference) = {
            let mut shared = self.shared.lock();
            if shared.is_none() {
                *shared = Some(self.process_ref_trace(t.owner())?);
            }
            let shared = shared.as_ref().unwrap();
            (shared.matcher.clone(), shared.reference.clone())
        };

        let mut pearson = matcher.pearson(&block.samples)?;
        if let Some(nan) = pearson.iter().position(|v| v.is_nan()) {
            error!(
                "detected NaN at index {} in pearson for trace {}",
                nan, block.index
            );
            return Err(LtError::invalid("NaN in pattern-match pearson vector"));
        }
        pearson.iter_mut().for_each(|v| *v = v.abs());

        let mut result = search_matches(&pearson, &self.cfg);
        if result.count_true > 0 {
            search_gaps(&pearson, &self.cfg, &reference, &mut result)?;
            optimize_gaps(&pearson, &self.cfg, &reference, &mut result)?;

            let found =
                result.count_true + result.count_predictable + result.count_unpredictable;
            if found < self.cfg.expecting {
                search_tail(
                    &pearson,
                    &self.cfg,
                    &reference,
                    &mut result,
                    self.cfg.expecting - found,
                    self.pattern_size,
                )?;
            }
        }

        let mut positions: Vec<usize> = result
            .entries
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    SplitKind::Confident
                        | SplitKind::GapPredictable
                        | SplitKind::GapUnpredictable
                        | SplitKind::Tail
                ) && e.index + self.pattern_size < block.samples.len()
            })
            .map(|e| e.index)
            .collect();
        positions.dedup();

        let timings = self.timings(t.data().expect("interesting checked data"));
        if positions.len() != self.expecting {
            warn!(
                "extracted {} timing patterns for trace {} (expecting {})",
                positions.len(),
                block.index,
                self.expecting
            );
        } else {
            warn!(
                "successfully extracted {} timing patterns for trace {}",
                positions.len(),
                block.index
            );
        }

        if *self.debugging.lock() {
            let num = pearson.len();
            let mut matches_track = vec![0.0f32; num];
            for e in result
                .entries
                .iter()
                .filter(|e| e.kind == SplitKind::Confident)
            {
                matches_track[e.index] = 1.0;
            }

            let mut timing_track = vec![0.0f32; num];
            if let (Some(&t0), Some(&tn)) = (timings.first(), timings.last()) {
                if tn > t0 {
                    for &tick in &timings {
                        let idx = ((tick - t0) as f64 / (tn - t0) as f64
                            * (num - 1) as f64) as usize;
                        timing_track[idx] = 1.0;
                    }
                }
            }

            block.matches = Some(matches_track);
            block.timing = Some(timing_track);
            block.pearson = Some(pearson);
        }

        block.positions = positions.into();
        Ok(())
    }

    fn finalize(
        &self,
        rec: &mut Record,
        block: &mut Self::Block,
        ts: &Arc<TraceSet>,
    ) -> Result<bool> {
        if *self.debugging.lock() && !block.debug_sent {
            let tracks = vec![
                ("Pearson", block.pearson.take()),
                ("Matches", block.matches.take()),
                ("Timings", block.timing.take()),
            ];

            for (slot, (name, track)) in tracks.into_iter().enumerate() {
                if let Some(track) = track {
                    let title = fit_title(
                        &format!("Trace {} {}", block.index, name),
                        DEBUG_TITLE_SIZE,
                    );
                    ts.push(
                        Port::ExtractTimingDebug,
                        3 * block.index + slot,
                        Some(&title),
                        None,
                        Some(&track),
                    )?;
                }
            }
            block.debug_sent = true;
        }

        let position = match block.positions.pop_front() {
            Some(p) => p,
            None => {
                warn!("finalize called with an empty split list");
                return Ok(false);
            }
        };

        rec.title = None; // the block engine numbers the output
        rec.data = Some(block.data.clone());
        rec.samples = Some(block.samples[position..position + self.pattern_size].to_vec());

        Ok(!block.positions.is_empty())
    }
}

#[allow(clippy::too_many_arguments)]
pub fn tfm_extract_timing(
    pattern_size: usize,
    expecting: usize,
    avg_len: usize,
    max_dev: usize,
    pattern: MatchRegion,
    crypto: CryptoKind,
) -> Box<dyn Transform> {
    tfm_block(
        ExtractTiming {
            pattern_size,
            expecting,
            cfg: SearchConfig {
                confidence: pattern.confidence as f32,
                avg_len,
                max_dev,
                expecting,
            },
            pattern,
            crypto,
            shared: Mutex::new(None),
            debugging: Mutex::new(false),
        },
        Completion::Singular,
    )
}
