//! The incremental statistics engine.
//!
//! Accumulators maintain running mean, variance, covariance, min/max and
//! absolute min/max over scalars and 1-D/2-D arrays using Welford's
//! numerically stable update, and derive Pearson correlation for CPA. Which
//! statistics are maintained is declared up front through a capability
//! bitset; each update executes only the sub-updates the capabilities and
//! their dependencies require.
pub mod lanes;
pub mod pattern;

use libtrace_core::errors::*;

use self::lanes::{
    cov_reduce, cov_row_update, dev_reduce, extreme_update, mean_update, mean_var_update,
    pearson_row, Extreme,
};

pub const STAT_AVG: u32 = 1 << 0;
pub const STAT_DEV: u32 = 1 << 1;
pub const STAT_COV: u32 = 1 << 2;
pub const STAT_PEARSON: u32 = 1 << 3;
pub const STAT_MAX: u32 = 1 << 4;
pub const STAT_MIN: u32 = 1 << 5;
pub const STAT_MAXABS: u32 = 1 << 6;
pub const STAT_MINABS: u32 = 1 << 7;

/// A statistic to read back out of an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Avg,
    Dev,
    Cov,
    Pearson,
    Max,
    Min,
    MaxAbs,
    MinAbs,
}

impl Stat {
    fn bit(self) -> u32 {
        match self {
            Stat::Avg => STAT_AVG,
            Stat::Dev => STAT_DEV,
            Stat::Cov => STAT_COV,
            Stat::Pearson => STAT_PEARSON,
            Stat::Max => STAT_MAX,
            Stat::Min => STAT_MIN,
            Stat::MaxAbs => STAT_MAXABS,
            Stat::MinAbs => STAT_MINABS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccShape {
    Single,
    Dual,
    SingleArray(usize),
    DualArray(usize, usize),
}

/// A running accumulator over one or two streams of scalars or arrays.
pub struct Accumulator {
    shape: AccShape,
    caps: u32,
    count: f32,

    avg: Vec<f32>,
    dev: Vec<f32>,
    cov: Vec<f32>,
    max: Vec<f32>,
    min: Vec<f32>,
    maxabs: Vec<f32>,
    minabs: Vec<f32>,
}

impl Accumulator {
    fn with_shape(shape: AccShape, caps: u32) -> Self {
        let (dims, cov_len) = match shape {
            AccShape::Single => (1, 0),
            AccShape::Dual => (2, 1),
            AccShape::SingleArray(n) => (n, 0),
            AccShape::DualArray(n, m) => (n + m, n * m),
        };

        let track_avg = caps & (STAT_AVG | STAT_DEV | STAT_COV | STAT_PEARSON) != 0;
        let track_dev = caps & (STAT_DEV | STAT_PEARSON) != 0;
        let track_cov = cov_len > 0 && caps & (STAT_COV | STAT_PEARSON) != 0;

        Accumulator {
            shape,
            caps,
            count: 0.0,
            avg: if track_avg { vec![0.0; dims] } else { Vec::new() },
            dev: if track_dev { vec![0.0; dims] } else { Vec::new() },
            cov: if track_cov { vec![0.0; cov_len] } else { Vec::new() },
            max: if caps & STAT_MAX != 0 { vec![0.0; dims] } else { Vec::new() },
            min: if caps & STAT_MIN != 0 { vec![0.0; dims] } else { Vec::new() },
            maxabs: if caps & STAT_MAXABS != 0 { vec![0.0; dims] } else { Vec::new() },
            minabs: if caps & STAT_MINABS != 0 { vec![0.0; dims] } else { Vec::new() },
        }
    }

    pub fn single(caps: u32) -> Self {
        Accumulator::with_shape(AccShape::Single, caps)
    }

    pub fn dual(caps: u32) -> Self {
        Accumulator::with_shape(AccShape::Dual, caps)
    }

    pub fn single_array(caps: u32, num: usize) -> Self {
        Accumulator::with_shape(AccShape::SingleArray(num), caps)
    }

    pub fn dual_array(caps: u32, num0: usize, num1: usize) -> Self {
        Accumulator::with_shape(AccShape::DualArray(num0, num1), caps)
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn reset(&mut self) {
        self.count = 0.0;
        for buf in [
            &mut self.avg,
            &mut self.dev,
            &mut self.cov,
            &mut self.max,
            &mut self.min,
            &mut self.maxabs,
            &mut self.minabs,
        ] {
            buf.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    fn dims(&self) -> usize {
        match self.shape {
            AccShape::Single => 1,
            AccShape::Dual => 2,
            AccShape::SingleArray(n) => n,
            AccShape::DualArray(n, m) => n + m,
        }
    }

    fn track_avg(&self) -> bool {
        !self.avg.is_empty()
    }

    fn track_dev(&self) -> bool {
        !self.dev.is_empty()
    }

    fn track_cov(&self) -> bool {
        !self.cov.is_empty()
    }

    fn init_extremes(&mut self, offset: usize, vals: &[f32]) {
        if !self.max.is_empty() {
            self.max[offset..offset + vals.len()].copy_from_slice(vals);
        }
        if !self.min.is_empty() {
            self.min[offset..offset + vals.len()].copy_from_slice(vals);
        }
        if !self.maxabs.is_empty() {
            for (dst, v) in self.maxabs[offset..].iter_mut().zip(vals) {
                *dst = v.abs();
            }
        }
        if !self.minabs.is_empty() {
            for (dst, v) in self.minabs[offset..].iter_mut().zip(vals) {
                *dst = v.abs();
            }
        }
    }

    fn update_extremes(&mut self, offset: usize, vals: &[f32]) {
        if !self.max.is_empty() {
            extreme_update(&mut self.max[offset..offset + vals.len()], vals, Extreme::Max);
        }
        if !self.min.is_empty() {
            extreme_update(&mut self.min[offset..offset + vals.len()], vals, Extreme::Min);
        }
        if !self.maxabs.is_empty() {
            extreme_update(
                &mut self.maxabs[offset..offset + vals.len()],
                vals,
                Extreme::MaxAbs,
            );
        }
        if !self.minabs.is_empty() {
            extreme_update(
                &mut self.minabs[offset..offset + vals.len()],
                vals,
                Extreme::MinAbs,
            );
        }
    }

    /// The Welford single update.
    pub fn accumulate_single(&mut self, val: f32) -> Result<()> {
        if self.shape != AccShape::Single {
            return Err(LtError::invalid("invalid accumulator type"));
        }

        self.count += 1.0;
        if self.count == 1.0 {
            if self.track_avg() {
                self.avg[0] = val;
            }
            self.init_extremes(0, &[val]);
            return Ok(());
        }

        if self.track_avg() {
            let m_old = self.avg[0];
            let m_new = m_old + (val - m_old) / self.count;
            if self.track_dev() {
                self.dev[0] += (val - m_old) * (val - m_new);
            }
            self.avg[0] = m_new;
        }
        self.update_extremes(0, &[val]);
        Ok(())
    }

    /// Feed a sequence of scalars one at a time.
    pub fn accumulate_single_many(&mut self, vals: &[f32]) -> Result<()> {
        for v in vals {
            self.accumulate_single(*v)?;
        }
        Ok(())
    }

    /// The Welford dual update: both streams plus their covariance,
    /// `cov += (x0 - m0_old)(x1 - m1_new)`.
    pub fn accumulate_dual(&mut self, val0: f32, val1: f32) -> Result<()> {
        if self.shape != AccShape::Dual {
            return Err(LtError::invalid("invalid accumulator type"));
        }

        self.count += 1.0;
        if self.count == 1.0 {
            if self.track_avg() {
                self.avg[0] = val0;
                self.avg[1] = val1;
            }
            self.init_extremes(0, &[val0]);
            self.init_extremes(1, &[val1]);
            return Ok(());
        }

        if self.track_avg() {
            let m0_old = self.avg[0];
            let m1_old = self.avg[1];
            let m0_new = m0_old + (val0 - m0_old) / self.count;
            let m1_new = m1_old + (val1 - m1_old) / self.count;

            if self.track_dev() {
                self.dev[0] += (val0 - m0_old) * (val0 - m0_new);
                self.dev[1] += (val1 - m1_old) * (val1 - m1_new);
            }
            if self.track_cov() {
                self.cov[0] += (val0 - m0_old) * (val1 - m1_new);
            }

            self.avg[0] = m0_new;
            self.avg[1] = m1_new;
        }

        self.update_extremes(0, &[val0]);
        self.update_extremes(1, &[val1]);
        Ok(())
    }

    /// One sample of an N-length array: N independent single accumulators
    /// sharing one count.
    pub fn accumulate_single_array(&mut self, vals: &[f32]) -> Result<()> {
        let n = match self.shape {
            AccShape::SingleArray(n) => n,
            _ => return Err(LtError::invalid("invalid accumulator type")),
        };
        if vals.len() != n {
            return Err(LtError::invalid("invalid data dimensions"));
        }

        self.count += 1.0;
        if self.count == 1.0 {
            if self.track_avg() {
                self.avg.copy_from_slice(vals);
            }
            self.init_extremes(0, vals);
            return Ok(());
        }

        if self.track_avg() {
            if self.track_dev() {
                mean_var_update(&mut self.avg, &mut self.dev, vals, self.count);
            } else {
                mean_update(&mut self.avg, vals, self.count);
            }
        }
        self.update_extremes(0, vals);
        Ok(())
    }

    /// One paired sample of an (N, M) dual-array accumulator.
    ///
    /// Covariance entry `(i, j)` is updated with
    /// `(val1[j] - m1_old) * (val0[i] - m0_new)`; the mixed old/new mean
    /// pairing is the pairwise extension of Welford that stays stable for
    /// highly-correlated streams.
    pub fn accumulate_dual_array(&mut self, val0: &[f32], val1: &[f32]) -> Result<()> {
        let (n, m) = match self.shape {
            AccShape::DualArray(n, m) => (n, m),
            _ => return Err(LtError::invalid("invalid accumulator type")),
        };
        if val0.len() != n || val1.len() != m {
            return Err(LtError::invalid("invalid data dimensions"));
        }

        self.count += 1.0;
        if self.count == 1.0 {
            if self.track_avg() {
                self.avg[..n].copy_from_slice(val0);
                self.avg[n..].copy_from_slice(val1);
            }
            self.init_extremes(0, val0);
            self.init_extremes(n, val1);
            return Ok(());
        }

        // first array: vectorized mean/variance plus extremes
        if self.track_avg() {
            let track_dev = self.track_dev();
            let (avg0, _) = self.avg.split_at_mut(n);
            if track_dev {
                let (dev0, _) = self.dev.split_at_mut(n);
                mean_var_update(avg0, dev0, val0, self.count);
            } else {
                mean_update(avg0, val0, self.count);
            }
        }
        self.update_extremes(0, val0);

        // second array: scalar walk, feeding one covariance row per entry
        for j in 0..m {
            if self.track_avg() {
                let m1_old = self.avg[n + j];
                let m1_new = m1_old + (val1[j] - m1_old) / self.count;

                if self.track_dev() {
                    self.dev[n + j] += (val1[j] - m1_old) * (val1[j] - m1_new);
                }
                if self.track_cov() {
                    let row = &mut self.cov[j * n..(j + 1) * n];
                    cov_row_update(row, val0, &self.avg[..n], val1[j] - m1_old);
                }

                self.avg[n + j] = m1_new;
            }
        }
        self.update_extremes(n, val1);
        Ok(())
    }

    fn check_cap(&self, stat: Stat) -> Result<()> {
        let available = match stat {
            Stat::Avg => self.track_avg(),
            Stat::Dev => self.track_dev(),
            Stat::Cov | Stat::Pearson => self.track_cov() && self.caps & stat.bit() != 0,
            Stat::Max => !self.max.is_empty(),
            Stat::Min => !self.min.is_empty(),
            Stat::MaxAbs => !self.maxabs.is_empty(),
            Stat::MinAbs => !self.minabs.is_empty(),
        };

        if available {
            Ok(())
        } else {
            Err(LtError::invalid(
                "accumulator does not have requested capability",
            ))
        }
    }

    /// Read one entry of a statistic.
    pub fn get(&self, stat: Stat, index: usize) -> Result<f32> {
        self.check_cap(stat)?;

        let dims = self.dims();
        let cov_len = self.cov.len();
        let bound = match stat {
            Stat::Cov | Stat::Pearson => cov_len,
            _ => dims,
        };
        if index >= bound {
            return Err(LtError::invalid(
                "invalid index for accumulator and statistic",
            ));
        }

        let divisor = self.count - 1.0;
        Ok(match stat {
            Stat::Avg => self.avg[index],
            Stat::Dev => (self.dev[index] / divisor).sqrt(),
            Stat::Cov => self.cov[index] / self.count,
            Stat::Pearson => match self.shape {
                AccShape::Dual => {
                    self.cov[0]
                        / (divisor
                            * (self.dev[0] / divisor).sqrt()
                            * (self.dev[1] / divisor).sqrt())
                }
                AccShape::DualArray(n, _) => {
                    let i0 = index % n;
                    let i1 = index / n;
                    self.cov[index]
                        / (divisor
                            * (self.dev[i0] / divisor).sqrt()
                            * (self.dev[n + i1] / divisor).sqrt())
                }
                _ => return Err(LtError::invalid("accumulator has no pearson")),
            },
            Stat::Max => self.max[index],
            Stat::Min => self.min[index],
            Stat::MaxAbs => self.maxabs[index],
            Stat::MinAbs => self.minabs[index],
        })
    }

    /// Read a whole statistic out, vectorized.
    pub fn get_all(&self, stat: Stat) -> Result<Vec<f32>> {
        self.check_cap(stat)?;
        let divisor = self.count - 1.0;

        Ok(match stat {
            Stat::Avg => self.avg.clone(),
            Stat::Dev => {
                let mut out = vec![0.0; self.dev.len()];
                dev_reduce(&mut out, &self.dev, divisor);
                out
            }
            Stat::Cov => {
                let mut out = vec![0.0; self.cov.len()];
                cov_reduce(&mut out, &self.cov, self.count);
                out
            }
            Stat::Pearson => match self.shape {
                AccShape::Dual => vec![self.get(Stat::Pearson, 0)?],
                AccShape::DualArray(n, m) => {
                    let mut out = vec![0.0; n * m];
                    for j in 0..m {
                        let dev1 = (self.dev[n + j] / divisor).sqrt();
                        pearson_row(
                            &mut out[j * n..(j + 1) * n],
                            &self.cov[j * n..(j + 1) * n],
                            &self.dev[..n],
                            dev1,
                            divisor,
                        );
                    }
                    out
                }
                _ => return Err(LtError::invalid("accumulator has no pearson")),
            },
            Stat::Max => self.max.clone(),
            Stat::Min => self.min.clone(),
            Stat::MaxAbs => self.maxabs.clone(),
            Stat::MinAbs => self.minabs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_mean(vals: &[f32]) -> f32 {
        vals.iter().sum::<f32>() / vals.len() as f32
    }

    fn naive_dev(vals: &[f32]) -> f32 {
        let mean = naive_mean(vals);
        let s: f32 = vals.iter().map(|v| (v - mean) * (v - mean)).sum();
        (s / (vals.len() as f32 - 1.0)).sqrt()
    }

    #[test]
    fn single_welford_matches_naive() {
        let vals: Vec<f32> = (0..1000).map(|i| ((i * 31 + 7) % 101) as f32 - 50.0).collect();

        let mut acc = Accumulator::single(STAT_AVG | STAT_DEV);
        acc.accumulate_single_many(&vals).unwrap();

        let bound = f32::EPSILON * vals.len() as f32 * 50.0;
        assert!((acc.get(Stat::Avg, 0).unwrap() - naive_mean(&vals)).abs() <= bound);
        assert!((acc.get(Stat::Dev, 0).unwrap() - naive_dev(&vals)).abs() <= 1e-3);
        assert!(acc.get(Stat::Dev, 0).unwrap() >= 0.0);
    }

    #[test]
    fn dual_pearson_of_identical_streams_is_one() {
        let mut acc = Accumulator::dual(STAT_PEARSON);
        for i in 0..100 {
            let v = (i % 17) as f32;
            acc.accumulate_dual(v, v).unwrap();
        }
        let r = acc.get(Stat::Pearson, 0).unwrap();
        assert!((r - 1.0).abs() <= 1e-5);
    }

    #[test]
    fn dual_pearson_of_negated_stream_is_minus_one() {
        let mut acc = Accumulator::dual(STAT_PEARSON);
        for i in 0..100 {
            let v = (i % 17) as f32;
            acc.accumulate_dual(v, -v).unwrap();
        }
        let r = acc.get(Stat::Pearson, 0).unwrap();
        assert!((r + 1.0).abs() <= 1e-5);
    }

    #[test]
    fn dual_pearson_stays_in_range_for_noisy_streams() {
        let mut acc = Accumulator::dual(STAT_PEARSON);
        for i in 0..500 {
            let x = ((i * 13 + 5) % 97) as f32;
            let y = ((i * 29 + 11) % 89) as f32;
            acc.accumulate_dual(x, y).unwrap();
        }
        let r = acc.get(Stat::Pearson, 0).unwrap();
        assert!(r >= -1.0 - 1e-5 && r <= 1.0 + 1e-5);
    }

    #[test]
    fn single_array_is_independent_lanes() {
        let mut acc = Accumulator::single_array(STAT_AVG | STAT_DEV, 37);
        let mut columns: Vec<Vec<f32>> = vec![Vec::new(); 37];

        for k in 0..50 {
            let vals: Vec<f32> = (0..37).map(|i| ((i * 7 + k * 13) % 23) as f32).collect();
            for (col, v) in columns.iter_mut().zip(&vals) {
                col.push(*v);
            }
            acc.accumulate_single_array(&vals).unwrap();
        }

        let means = acc.get_all(Stat::Avg).unwrap();
        let devs = acc.get_all(Stat::Dev).unwrap();
        for i in 0..37 {
            assert!((means[i] - naive_mean(&columns[i])).abs() <= 1e-4);
            assert!((devs[i] - naive_dev(&columns[i])).abs() <= 1e-3);
        }
    }

    #[test]
    fn dual_array_pearson_finds_the_correlated_column() {
        // column 3 of the first stream tracks the single second-stream lane
        let mut acc = Accumulator::dual_array(STAT_PEARSON, 8, 1);
        for i in 0..200 {
            let y = ((i * 13 + 1) % 41) as f32;
            let mut v0 = vec![0.0f32; 8];
            for (j, v) in v0.iter_mut().enumerate() {
                *v = ((i * (7 + j) + 3 * j) % 29) as f32;
            }
            v0[3] = 2.0 * y + 1.0;
            acc.accumulate_dual_array(&v0, &[y]).unwrap();
        }

        let pearson = acc.get_all(Stat::Pearson).unwrap();
        assert_eq!(pearson.len(), 8);
        assert!((pearson[3] - 1.0).abs() <= 1e-4);
        for (i, r) in pearson.iter().enumerate() {
            if i != 3 {
                assert!(r.abs() < 0.5);
            }
        }
    }

    #[test]
    fn dual_array_matches_scalar_dual() {
        // an (1, 1) dual array must agree with the plain dual accumulator
        let mut arr = Accumulator::dual_array(STAT_PEARSON, 1, 1);
        let mut dual = Accumulator::dual(STAT_PEARSON);

        for i in 0..300 {
            let x = ((i * 7 + 3) % 31) as f32;
            let y = ((i * 11 + 5) % 37) as f32 + 0.25 * x;
            arr.accumulate_dual_array(&[x], &[y]).unwrap();
            dual.accumulate_dual(x, y).unwrap();
        }

        let ra = arr.get(Stat::Pearson, 0).unwrap();
        let rd = dual.get(Stat::Pearson, 0).unwrap();
        assert!((ra - rd).abs() <= 1e-5);
    }

    #[test]
    fn extremes_over_arrays() {
        let mut acc = Accumulator::single_array(STAT_MAX | STAT_MIN | STAT_MAXABS | STAT_MINABS, 3);
        acc.accumulate_single_array(&[1.0, -5.0, 2.0]).unwrap();
        acc.accumulate_single_array(&[-3.0, 4.0, 2.5]).unwrap();

        assert_eq!(acc.get_all(Stat::Max).unwrap(), vec![1.0, 4.0, 2.5]);
        assert_eq!(acc.get_all(Stat::Min).unwrap(), vec![-3.0, -5.0, 2.0]);
        assert_eq!(acc.get_all(Stat::MaxAbs).unwrap(), vec![3.0, 5.0, 2.5]);
        assert_eq!(acc.get_all(Stat::MinAbs).unwrap(), vec![1.0, 4.0, 2.0]);
    }

    #[test]
    fn missing_capability_is_invalid() {
        let acc = Accumulator::single(STAT_AVG);
        assert!(acc.get(Stat::Max, 0).is_err());

        let acc = Accumulator::single_array(STAT_AVG, 4);
        assert!(acc.get_all(Stat::Pearson).is_err());
    }

    #[test]
    fn dimension_mismatch_is_invalid() {
        let mut acc = Accumulator::dual_array(STAT_PEARSON, 4, 2);
        assert!(acc.accumulate_dual_array(&[0.0; 3], &[0.0; 2]).is_err());
        assert!(acc.accumulate_dual_array(&[0.0; 4], &[0.0; 1]).is_err());
    }

    #[test]
    fn reset_starts_over() {
        let mut acc = Accumulator::single(STAT_AVG);
        acc.accumulate_single_many(&[5.0, 7.0]).unwrap();
        acc.reset();
        acc.accumulate_single(1.0).unwrap();
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.get(Stat::Avg, 0).unwrap(), 1.0);
    }
}
