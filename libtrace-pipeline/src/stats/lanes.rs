//! Portable wide-lane kernels for the statistics engine.
//!
//! Inner loops process a block of `W` lanes, advance by `W`, and fall through
//! to the next smaller width, ending with a scalar tail. Widths 16, 8 and 4
//! cover the vector units we care about; the only platform requirement is
//! IEEE-754 `f32`. Results match the scalar reference for finite inputs up to
//! last-bit rounding from reassociation.

pub trait Lane: Copy {
    const WIDTH: usize;

    fn load(src: &[f32]) -> Self;
    fn store(self, dst: &mut [f32]);
    fn splat(v: f32) -> Self;

    fn add(self, o: Self) -> Self;
    fn sub(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    fn div(self, o: Self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn max(self, o: Self) -> Self;
    fn min(self, o: Self) -> Self;
}

#[derive(Clone, Copy)]
pub struct LaneN<const W: usize>([f32; W]);

macro_rules! lanewise {
    ($name:ident, $op:tt) => {
        #[inline(always)]
        fn $name(self, o: Self) -> Self {
            let mut out = self.0;
            for i in 0..W {
                out[i] = out[i] $op o.0[i];
            }
            LaneN(out)
        }
    };
}

macro_rules! lanewise_fn {
    ($name:ident, $f:expr) => {
        #[inline(always)]
        fn $name(self, o: Self) -> Self {
            let mut out = self.0;
            for i in 0..W {
                out[i] = $f(out[i], o.0[i]);
            }
            LaneN(out)
        }
    };
}

impl<const W: usize> Lane for LaneN<W> {
    const WIDTH: usize = W;

    #[inline(always)]
    fn load(src: &[f32]) -> Self {
        let mut out = [0.0f32; W];
        out.copy_from_slice(&src[..W]);
        LaneN(out)
    }

    #[inline(always)]
    fn store(self, dst: &mut [f32]) {
        dst[..W].copy_from_slice(&self.0);
    }

    #[inline(always)]
    fn splat(v: f32) -> Self {
        LaneN([v; W])
    }

    lanewise!(add, +);
    lanewise!(sub, -);
    lanewise!(mul, *);
    lanewise!(div, /);
    lanewise_fn!(max, f32::max);
    lanewise_fn!(min, f32::min);

    #[inline(always)]
    fn sqrt(self) -> Self {
        let mut out = self.0;
        for v in out.iter_mut() {
            *v = v.sqrt();
        }
        LaneN(out)
    }

    #[inline(always)]
    fn abs(self) -> Self {
        let mut out = self.0;
        for v in out.iter_mut() {
            *v = v.abs();
        }
        LaneN(out)
    }
}

/// `avg[i] <- avg[i] + (vals[i] - avg[i]) / count`
pub fn mean_update(avg: &mut [f32], vals: &[f32], count: f32) {
    #[inline(always)]
    fn block<const W: usize>(avg: &mut [f32], vals: &[f32], count: f32) {
        let m = LaneN::<W>::load(avg);
        let v = LaneN::<W>::load(vals);
        m.add(v.sub(m).div(LaneN::splat(count))).store(avg);
    }

    let mut i = 0;
    let len = vals.len();
    while i + 16 <= len {
        block::<16>(&mut avg[i..], &vals[i..], count);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut avg[i..], &vals[i..], count);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut avg[i..], &vals[i..], count);
        i += 4;
    }
    while i < len {
        avg[i] += (vals[i] - avg[i]) / count;
        i += 1;
    }
}

/// The Welford pair update over a lane:
/// `m_new = m + (v - m)/count; s += (v - m)(v - m_new); m = m_new`.
pub fn mean_var_update(avg: &mut [f32], s: &mut [f32], vals: &[f32], count: f32) {
    #[inline(always)]
    fn block<const W: usize>(avg: &mut [f32], s: &mut [f32], vals: &[f32], count: f32) {
        let m = LaneN::<W>::load(avg);
        let v = LaneN::<W>::load(vals);
        let m_new = m.add(v.sub(m).div(LaneN::splat(count)));
        LaneN::<W>::load(s)
            .add(v.sub(m).mul(v.sub(m_new)))
            .store(s);
        m_new.store(avg);
    }

    let mut i = 0;
    let len = vals.len();
    while i + 16 <= len {
        block::<16>(&mut avg[i..], &mut s[i..], &vals[i..], count);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut avg[i..], &mut s[i..], &vals[i..], count);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut avg[i..], &mut s[i..], &vals[i..], count);
        i += 4;
    }
    while i < len {
        let m_new = avg[i] + (vals[i] - avg[i]) / count;
        s[i] += (vals[i] - avg[i]) * (vals[i] - m_new);
        avg[i] = m_new;
        i += 1;
    }
}

/// `cov[i] += factor * (v0[i] - avg0[i])`
pub fn cov_row_update(cov: &mut [f32], v0: &[f32], avg0: &[f32], factor: f32) {
    #[inline(always)]
    fn block<const W: usize>(cov: &mut [f32], v0: &[f32], avg0: &[f32], factor: f32) {
        let c = LaneN::<W>::load(cov);
        let v = LaneN::<W>::load(v0);
        let m = LaneN::<W>::load(avg0);
        c.add(v.sub(m).mul(LaneN::splat(factor))).store(cov);
    }

    let mut i = 0;
    let len = v0.len();
    while i + 16 <= len {
        block::<16>(&mut cov[i..], &v0[i..], &avg0[i..], factor);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut cov[i..], &v0[i..], &avg0[i..], factor);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut cov[i..], &v0[i..], &avg0[i..], factor);
        i += 4;
    }
    while i < len {
        cov[i] += factor * (v0[i] - avg0[i]);
        i += 1;
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum Extreme {
    Max,
    Min,
    MaxAbs,
    MinAbs,
}

/// Fold `vals` into the running extreme in `dst`.
pub fn extreme_update(dst: &mut [f32], vals: &[f32], which: Extreme) {
    #[inline(always)]
    fn block<const W: usize>(dst: &mut [f32], vals: &[f32], which: Extreme) {
        let d = LaneN::<W>::load(dst);
        let v = LaneN::<W>::load(vals);
        match which {
            Extreme::Max => d.max(v).store(dst),
            Extreme::Min => d.min(v).store(dst),
            Extreme::MaxAbs => d.max(v.abs()).store(dst),
            Extreme::MinAbs => d.min(v.abs()).store(dst),
        }
    }

    let mut i = 0;
    let len = vals.len();
    while i + 16 <= len {
        block::<16>(&mut dst[i..], &vals[i..], which);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut dst[i..], &vals[i..], which);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut dst[i..], &vals[i..], which);
        i += 4;
    }
    while i < len {
        dst[i] = match which {
            Extreme::Max => dst[i].max(vals[i]),
            Extreme::Min => dst[i].min(vals[i]),
            Extreme::MaxAbs => dst[i].max(vals[i].abs()),
            Extreme::MinAbs => dst[i].min(vals[i].abs()),
        };
        i += 1;
    }
}

/// `out[i] = sqrt(s[i] / divisor)`
pub fn dev_reduce(out: &mut [f32], s: &[f32], divisor: f32) {
    #[inline(always)]
    fn block<const W: usize>(out: &mut [f32], s: &[f32], divisor: f32) {
        LaneN::<W>::load(s)
            .div(LaneN::splat(divisor))
            .sqrt()
            .store(out);
    }

    let mut i = 0;
    let len = s.len();
    while i + 16 <= len {
        block::<16>(&mut out[i..], &s[i..], divisor);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut out[i..], &s[i..], divisor);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut out[i..], &s[i..], divisor);
        i += 4;
    }
    while i < len {
        out[i] = (s[i] / divisor).sqrt();
        i += 1;
    }
}

/// `out[i] = cov[i] / divisor`
pub fn cov_reduce(out: &mut [f32], cov: &[f32], divisor: f32) {
    #[inline(always)]
    fn block<const W: usize>(out: &mut [f32], cov: &[f32], divisor: f32) {
        LaneN::<W>::load(cov).div(LaneN::splat(divisor)).store(out);
    }

    let mut i = 0;
    let len = cov.len();
    while i + 16 <= len {
        block::<16>(&mut out[i..], &cov[i..], divisor);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut out[i..], &cov[i..], divisor);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut out[i..], &cov[i..], divisor);
        i += 4;
    }
    while i < len {
        out[i] = cov[i] / divisor;
        i += 1;
    }
}

/// One Pearson row: `out[i] = cov[i] / (divisor * dev1 * sqrt(s0[i]/divisor))`
pub fn pearson_row(out: &mut [f32], cov: &[f32], s0: &[f32], dev1: f32, divisor: f32) {
    #[inline(always)]
    fn block<const W: usize>(out: &mut [f32], cov: &[f32], s0: &[f32], dev1: f32, divisor: f32) {
        let denom = LaneN::<W>::load(s0)
            .div(LaneN::splat(divisor))
            .sqrt()
            .mul(LaneN::splat(divisor * dev1));
        LaneN::<W>::load(cov).div(denom).store(out);
    }

    let mut i = 0;
    let len = cov.len();
    while i + 16 <= len {
        block::<16>(&mut out[i..], &cov[i..], &s0[i..], dev1, divisor);
        i += 16;
    }
    while i + 8 <= len {
        block::<8>(&mut out[i..], &cov[i..], &s0[i..], dev1, divisor);
        i += 8;
    }
    while i + 4 <= len {
        block::<4>(&mut out[i..], &cov[i..], &s0[i..], dev1, divisor);
        i += 4;
    }
    while i < len {
        out[i] = cov[i] / (divisor * dev1 * (s0[i] / divisor).sqrt());
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_var_matches_scalar_reference() {
        // 23 elements exercises the 16, 4 and scalar paths in one call
        let n = 23;
        let streams: Vec<Vec<f32>> = (0..5)
            .map(|s| (0..n).map(|i| ((i * 7 + s * 13) % 11) as f32 - 3.0).collect())
            .collect();

        let mut avg = vec![0.0f32; n];
        let mut s = vec![0.0f32; n];
        let mut ref_avg = vec![0.0f32; n];
        let mut ref_s = vec![0.0f32; n];

        for (k, vals) in streams.iter().enumerate() {
            let count = (k + 1) as f32;
            if k == 0 {
                avg.copy_from_slice(vals);
                ref_avg.copy_from_slice(vals);
                continue;
            }

            mean_var_update(&mut avg, &mut s, vals, count);
            for i in 0..n {
                let m_new = ref_avg[i] + (vals[i] - ref_avg[i]) / count;
                ref_s[i] += (vals[i] - ref_avg[i]) * (vals[i] - m_new);
                ref_avg[i] = m_new;
            }
        }

        for i in 0..n {
            assert!((avg[i] - ref_avg[i]).abs() <= f32::EPSILON * 4.0);
            assert!((s[i] - ref_s[i]).abs() <= f32::EPSILON * 16.0);
        }
    }

    #[test]
    fn extremes_fold_correctly() {
        let mut mx = vec![f32::MIN; 9];
        let mut mn = vec![f32::MAX; 9];
        let vals = [-4.0f32, 2.0, 0.0, -1.0, 7.0, -9.0, 3.0, 3.0, -2.5];

        extreme_update(&mut mx, &vals, Extreme::Max);
        extreme_update(&mut mn, &vals, Extreme::MinAbs);

        assert_eq!(mx, vals.to_vec());
        assert_eq!(mn, vals.iter().map(|v| v.abs()).collect::<Vec<_>>());
    }

    #[test]
    fn dev_reduce_is_sqrt_over_divisor() {
        let s = vec![4.0f32; 21];
        let mut out = vec![0.0f32; 21];
        dev_reduce(&mut out, &s, 4.0);
        assert!(out.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }
}
