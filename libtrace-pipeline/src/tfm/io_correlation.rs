//! Correlate samples against the Hamming weight of the associated data.
use libtrace_core::errors::*;
use libtrace_core::SetShape;

use crate::crypto::{hamming_weight, verify_aes128};
use crate::graph::Transform;

use super::cpa::{tfm_cpa, PowerModel};

struct IoCorrelation {
    granularity: usize,
    num: usize,
    verify_data: bool,
}

impl PowerModel for IoCorrelation {
    fn output_shape(&self, prev: &SetShape) -> (usize, usize) {
        (self.num, prev.num_samples)
    }

    fn compute(&self, data: &[u8], index: usize) -> Result<f32> {
        if self.verify_data && !verify_aes128(data) {
            return Err(LtError::invalid("data failed validation"));
        }

        let div = self.granularity / 8;
        if data.len() < div * (index + 1) {
            return Err(LtError::invalid("trace data too short for granularity"));
        }

        let sum: u32 = data[div * index..div * (index + 1)]
            .iter()
            .map(|b| hamming_weight(*b) as u32)
            .sum();
        Ok(sum as f32)
    }

    fn progress_title(&self, index: usize, _count: usize) -> String {
        format!("CPA {}", index)
    }
}

pub fn tfm_io_correlation(
    verify_data: bool,
    granularity: usize,
    num: usize,
) -> Result<Box<dyn Transform>> {
    if !matches!(granularity, 8 | 16 | 32 | 64 | 128) {
        return Err(LtError::invalid("unsupported granularity"));
    }

    Ok(tfm_cpa(Box::new(IoCorrelation {
        granularity,
        num,
        verify_data,
    })))
}
