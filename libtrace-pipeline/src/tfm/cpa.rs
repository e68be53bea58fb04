//! The generic correlation power analysis engine.
//!
//! Each output record at index `t` covers `num_models` key guesses: for every
//! upstream trace the power model maps the associated data to one scalar per
//! guess, and a dual-array accumulator maintains the Pearson correlation
//! between every sample point and every guess. Progress and per-model curves
//! are published on the side-channel bus as the accumulation advances.
use std::sync::Arc;

use log::{debug, warn};

use libtrace_core::bitconverter::fit_title;
use libtrace_core::errors::*;
use libtrace_core::{Port, Record, SampleCoding, SetShape};

use crate::graph::{NodeSeed, TraceSet, Transform};
use crate::stats::{Accumulator, Stat, STAT_PEARSON};

pub const CPA_REPORT_INTERVAL: usize = 100_000;
pub const CPA_TITLE_SIZE: usize = 128;

/// A key-dependent power model and the output plan it implies.
pub trait PowerModel: Send + Sync {
    /// Output geometry: `(num_traces, num_samples)` of the derived set.
    fn output_shape(&self, prev: &SetShape) -> (usize, usize);

    /// The modelled power of one trace's data under model index `index`.
    ///
    /// An error skips the whole trace (used by the verify-gated variants).
    fn compute(&self, data: &[u8], index: usize) -> Result<f32>;

    /// Title for the split-per-model curves of model `index`.
    fn progress_title(&self, index: usize, count: usize) -> String;
}

pub struct TfmCpa {
    model: Box<dyn PowerModel>,
    num_models: usize,
}

impl Transform for TfmCpa {
    fn name(&self) -> &'static str {
        "cpa"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let (num_traces, num_samples) = self.model.output_shape(prev.shape());

        if num_samples % prev.shape().num_samples != 0 {
            return Err(LtError::invalid(
                "model output samples not a multiple of the upstream sample count",
            ));
        }
        self.num_models = num_samples / prev.shape().num_samples;

        let shape = SetShape::new(num_traces, num_samples, 0, 0, SampleCoding::Float, 1.0);
        Ok(NodeSeed::shaped(shape))
    }

    fn init_waiter(
        &self,
        shape: &mut SetShape,
        port: Port,
        producer: &Arc<TraceSet>,
    ) -> Result<()> {
        let upstream = producer
            .prev()
            .ok_or_else(|| LtError::invalid("CPA node without an upstream"))?;

        shape.title_size = CPA_TITLE_SIZE;
        shape.data_size = 0;
        shape.coding = SampleCoding::Float;
        shape.yscale = 1.0;

        let out_traces = producer.shape().num_traces;
        let out_samples = producer.shape().num_samples;
        let in_traces = upstream.shape().num_traces;

        match port {
            Port::CpaProgress => {
                shape.num_traces = out_traces * in_traces / CPA_REPORT_INTERVAL;
                shape.num_samples = out_samples;
            }
            Port::CpaSplitPm => {
                shape.num_traces = self.num_models * out_traces;
                shape.num_samples = out_samples / self.num_models;
            }
            Port::CpaSplitPmProgress => {
                shape.num_traces =
                    self.num_models * out_traces * in_traces / CPA_REPORT_INTERVAL;
                shape.num_samples = out_samples / self.num_models;
            }
            _ => {
                return Err(LtError::invalid(format!(
                    "invalid port specified: {:?}",
                    port
                )))
            }
        }

        Ok(())
    }

    fn trace_size(&self, ts: &TraceSet) -> usize {
        let shape = ts.shape();
        shape.title_size + shape.num_samples * std::mem::size_of::<f32>()
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let prev_samples = prev.num_samples();
        let out_traces = ts.shape().num_traces;

        let mut pm = vec![0.0f32; self.num_models];
        let mut acc = Accumulator::dual_array(STAT_PEARSON, prev_samples, self.num_models);
        let mut count = 0usize;

        'traces: for i in 0..prev.num_traces() {
            if i % CPA_REPORT_INTERVAL == 0 {
                warn!("CPA {} working on trace {}", index, i);
            }

            let t = prev.get_trace(i)?;
            let (samples, data) = match (t.samples(), t.data()) {
                (Some(s), Some(d)) => (s, d),
                _ => {
                    debug!("no samples or data for index {}, skipping", i);
                    continue;
                }
            };

            for (j, p) in pm.iter_mut().enumerate() {
                match self.model.compute(data, self.num_models * index + j) {
                    Ok(v) => *p = v,
                    Err(_) => {
                        debug!("power model rejected trace {}, skipping", i);
                        continue 'traces;
                    }
                }
            }

            acc.accumulate_dual_array(samples, &pm)?;
            count += 1;

            if count % CPA_REPORT_INTERVAL == 0 && ts.has_waiters() {
                self.push_progress(ts, index, out_traces, count, &acc)?;
            }
        }

        let pearson = acc.get_all(Stat::Pearson)?;
        if ts.has_waiters() {
            self.push_split(ts, index, count, &pearson)?;
        }

        Ok(Record {
            title: None,
            data: None,
            samples: Some(pearson),
        })
    }
}

impl TfmCpa {
    fn push_progress(
        &self,
        ts: &Arc<TraceSet>,
        index: usize,
        out_traces: usize,
        count: usize,
        acc: &Accumulator,
    ) -> Result<()> {
        let pearson = acc.get_all(Stat::Pearson)?;
        let round = count / CPA_REPORT_INTERVAL - 1;
        let split_len = ts.shape().num_samples / self.num_models;

        debug!("CPA {} pushing intermediate {}", index, round);

        let title = fit_title(
            &format!("CPA {} ({} traces)", index, count),
            CPA_TITLE_SIZE,
        );
        ts.push(
            Port::CpaProgress,
            index + out_traces * round,
            Some(&title),
            None,
            Some(&pearson),
        )?;

        for j in 0..self.num_models {
            let title = fit_title(
                &self
                    .model
                    .progress_title(self.num_models * index + j, count),
                CPA_TITLE_SIZE,
            );

            ts.push(
                Port::CpaSplitPmProgress,
                self.num_models * out_traces * round + self.num_models * index + j,
                Some(&title),
                None,
                Some(&pearson[j * split_len..(j + 1) * split_len]),
            )?;
        }

        Ok(())
    }

    fn push_split(
        &self,
        ts: &Arc<TraceSet>,
        index: usize,
        count: usize,
        pearson: &[f32],
    ) -> Result<()> {
        let split_len = ts.shape().num_samples / self.num_models;

        for j in 0..self.num_models {
            let title = fit_title(
                &self
                    .model
                    .progress_title(self.num_models * index + j, count),
                CPA_TITLE_SIZE,
            );

            ts.push(
                Port::CpaSplitPm,
                self.num_models * index + j,
                Some(&title),
                None,
                Some(&pearson[j * split_len..(j + 1) * split_len]),
            )?;
        }

        Ok(())
    }
}

pub fn tfm_cpa(model: Box<dyn PowerModel>) -> Box<dyn Transform> {
    Box::new(TfmCpa {
        model,
        num_models: 1,
    })
}
