//! Group inputs and emit the chosen summary statistic per group.
use std::sync::Arc;

use libtrace_core::errors::*;
use libtrace_core::{AlongFilter, Record, SummaryStat};

use crate::graph::{Trace, TraceSet, Transform};
use crate::stats::{Accumulator, Stat};

use super::block::{tfm_block, BlockConsumer, BlockShape, Completion};
use super::summary_caps;

pub(crate) struct AlongConfig {
    pub stat: SummaryStat,
    pub along: AlongFilter,
    pub num: usize,
}

pub struct ReduceAlongBlock {
    count: usize,
    cmp_data: Option<Vec<u8>>,
    acc: Accumulator,
}

struct ReduceAlong {
    cfg: AlongConfig,
    num_samples: usize,
}

impl BlockConsumer for ReduceAlong {
    type Block = ReduceAlongBlock;

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<BlockShape> {
        if matches!(self.cfg.stat, SummaryStat::Min | SummaryStat::Max) {
            return Err(LtError::invalid("unimplemented summary for reduce_along"));
        }

        let prev_shape = prev.shape();
        self.num_samples = prev_shape.num_samples;

        Ok(BlockShape {
            num_samples: prev_shape.num_samples,
            data_size: match self.cfg.along {
                AlongFilter::Num => 0,
                AlongFilter::Data => prev_shape.data_size,
            },
            coding: libtrace_core::SampleCoding::Float,
            yscale: 1.0,
        })
    }

    fn initialize(&self, t: &Trace) -> Result<Self::Block> {
        Ok(ReduceAlongBlock {
            count: 0,
            cmp_data: match self.cfg.along {
                AlongFilter::Num => None,
                AlongFilter::Data => Some(
                    t.data()
                        .ok_or_else(|| LtError::invalid("grouping by data without data"))?
                        .to_vec(),
                ),
            },
            acc: Accumulator::single_array(summary_caps(self.cfg.stat), self.num_samples),
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
        block
            .acc
            .accumulate_single_array(t.samples().expect("interesting checked samples"))
    }

    fn finalize(
        &self,
        rec: &mut Record,
        block: &mut Self::Block,
        _ts: &Arc<TraceSet>,
    ) -> Result<bool> {
        rec.data = block.cmp_data.take();
        rec.samples = Some(match self.cfg.stat {
            SummaryStat::Avg => block.acc.get_all(Stat::Avg)?,
            SummaryStat::Dev => block.acc.get_all(Stat::Dev)?,
            SummaryStat::Min | SummaryStat::Max => {
                return Err(LtError::invalid("unimplemented summary for reduce_along"))
            }
        });

        Ok(false)
    }
}

pub fn tfm_reduce_along(stat: SummaryStat, along: AlongFilter, num: usize) -> Box<dyn Transform> {
    tfm_block(
        ReduceAlong {
            cfg: AlongConfig { stat, along, num },
            num_samples: 0,
        },
        Completion::ListLen,
    )
}
