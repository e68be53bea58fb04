//! Group inputs and emit every trace of a group in summary order.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::{AlongFilter, Record, SummaryStat};

use crate::graph::{Trace, TraceSet, Transform};

use super::block::{tfm_block, BlockConsumer, BlockShape, Completion};
use super::reduce_along::AlongConfig;

pub struct SortAlongBlock {
    count: usize,
    cmp_data: Option<Vec<u8>>,
    sorted: bool,
    entries: Vec<(f32, Record)>,
}

struct SortAlong {
    cfg: AlongConfig,
}

impl BlockConsumer for SortAlong {
    type Block = SortAlongBlock;

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<BlockShape> {
        if !matches!(self.cfg.stat, SummaryStat::Max) {
            return Err(LtError::invalid("unimplemented summary for sort_along"));
        }

        let prev_shape = prev.shape();
        Ok(BlockShape {
            num_samples: prev_shape.num_samples,
            data_size: prev_shape.data_size,
            coding: prev_shape.coding,
            yscale: prev_shape.yscale,
        })
    }

    fn initialize(&self, t: &Trace) -> Result<Self::Block> {
        Ok(SortAlongBlock {
            count: 0,
            cmp_data: match self.cfg.along {
                AlongFilter::Num => None,
                AlongFilter::Data => Some(
                    t.data()
                        .ok_or_else(|| LtError::invalid("grouping by data without data"))?
                        .to_vec(),
                ),
            },
            sorted: false,
            entries: Vec::new(),
        })
    }

    fn interesting(&self, t: &Trace) -> bool {
        match self.cfg.along {
            AlongFilter::Num => t.samples().is_some(),
            AlongFilter::Data => t.data().is_some() && t.samples().is_some(),
        }
    }

    fn matches(&self, t: &Trace, block: &Self::Block) -> bool {
        match self.cfg.along {
            AlongFilter::Num => block.count < self.cfg.num,
            AlongFilter::Data => block.cmp_data.as_deref() == t.data(),
        }
    }

    fn accumulate(&self, t: &Trace, block: &mut Self::Block) -> Result<()> {
        if !self.matches(t, block) {
            return Err(LtError::invalid("accumulate called with incorrect block"));
        }
        block.count += 1;

        let samples = t.samples().expect("interesting checked samples");
        let val = samples.iter().fold(f32::MIN, |m, v| m.max(v.abs()));
        block.entries.push((val, t.record().clone()));
        Ok(())
    }

    fn finalize(
        &self,
        rec: &mut Record,
        block: &mut Self::Block,
        _ts: &Arc<TraceSet>,
    ) -> Result<bool> {
        if !block.sorted {
            block
                .entries
                .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            block.sorted = true;
        }

        if block.entries.is_empty() {
            return Err(LtError::invalid("finalize called for an empty block"));
        }

        *rec = block.entries.remove(0).1;
        Ok(!block.entries.is_empty())
    }
}

pub fn tfm_sort_along(stat: SummaryStat, along: AlongFilter, num: usize) -> Box<dyn Transform> {
    tfm_block(
        SortAlong {
            cfg: AlongConfig { stat, along, num },
        },
        Completion::ListLen,
    )
}
