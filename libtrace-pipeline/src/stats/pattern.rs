//! The sliding-Pearson pattern matcher.
//!
//! For a reference pattern of length `L` and a trace of length `N`, produce
//! the length `N - L` vector whose entry `k` is the Pearson correlation
//! between `samples[k..k+L]` and the pattern. Computed by feeding `L`
//! shifted copies of the trace into an `(N - L, 1)` dual-array accumulator,
//! so the whole vector falls out of one accumulation pass.
use libtrace_core::errors::*;

use super::{Accumulator, Stat, STAT_PEARSON};

#[derive(Clone)]
pub struct PatternMatcher {
    pattern: Vec<f32>,
}

impl PatternMatcher {
    pub fn new(pattern: Vec<f32>) -> Result<Self> {
        if pattern.len() < 2 {
            return Err(LtError::invalid("pattern must have at least two samples"));
        }
        Ok(PatternMatcher { pattern })
    }

    pub fn pattern_len(&self) -> usize {
        self.pattern.len()
    }

    /// The Pearson vector over every valid placement of the pattern.
    pub fn pearson(&self, samples: &[f32]) -> Result<Vec<f32>> {
        let l = self.pattern.len();
        if samples.len() <= l {
            return Err(LtError::invalid(
                "trace shorter than the reference pattern",
            ));
        }

        let num = samples.len() - l;
        let mut acc = Accumulator::dual_array(STAT_PEARSON, num, 1);
        for i in 0..l {
            acc.accumulate_dual_array(&samples[i..i + num], &self.pattern[i..i + 1])?;
        }

        acc.get_all(Stat::Pearson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(center: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let d = i as f32 - center as f32;
                (-d * d / 8.0).exp()
            })
            .collect()
    }

    #[test]
    fn peak_at_the_planted_pattern() {
        // a trace of pseudo-noise with the pattern planted at offset 60
        let pattern = bump(5, 11);
        let mut samples: Vec<f32> = (0..200)
            .map(|i| 0.2 * (((i * 37 + 11) % 23) as f32 / 23.0 - 0.5))
            .collect();
        for (i, p) in pattern.iter().enumerate() {
            samples[60 + i] += *p;
        }

        let matcher = PatternMatcher::new(pattern).unwrap();
        let pearson = matcher.pearson(&samples).unwrap();
        assert_eq!(pearson.len(), 200 - 11);

        let best = pearson
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .unwrap()
            .0;
        assert_eq!(best, 60);
        assert!(pearson[60] > 0.9);
    }

    #[test]
    fn pearson_values_stay_bounded() {
        let pattern = bump(3, 7);
        let samples: Vec<f32> = (0..100).map(|i| ((i * 13 + 7) % 31) as f32).collect();

        let matcher = PatternMatcher::new(pattern).unwrap();
        for r in matcher.pearson(&samples).unwrap() {
            assert!(r.abs() <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn short_trace_is_invalid() {
        let matcher = PatternMatcher::new(vec![0.0; 16]).unwrap();
        assert!(matcher.pearson(&[0.0; 16]).is_err());
        assert!(matcher.pearson(&[0.0; 10]).is_err());
    }
}
