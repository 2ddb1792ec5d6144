//! Robust statistics and level conversions
//!
//! All helpers ignore non-finite inputs.

use crate::config::{Aggregate, RobustParams, PA0};

/// Consistency constant turning MAD into a normal-distribution sigma
pub const MAD_SIGMA: f64 = 1.4826;

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Linearly interpolated quantile, `q` in [0, 1]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let v = finite_sorted(values);
    if v.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(v[lo] + (v[hi] - v[lo]) * (pos - lo as f64))
}

pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    quantile(values, p / 100.0)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
}

/// Median absolute deviation
pub fn mad(values: &[f64]) -> Option<f64> {
    let m = median(values)?;
    let dev: Vec<f64> = values.iter().filter(|x| x.is_finite()).map(|x| (x - m).abs()).collect();
    median(&dev)
}

/// Keep values with `|v − median| ≤ τ·1.4826·MAD`; a zero MAD keeps everything
pub fn mad_clip(values: &[f64], tau: f64) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    let (Some(m), Some(d)) = (median(&finite), mad(&finite)) else {
        return finite;
    };
    if d <= 0.0 {
        return finite;
    }
    let limit = tau * MAD_SIGMA * d;
    finite.into_iter().filter(|x| (x - m).abs() <= limit).collect()
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let (mut num, mut den) = (0.0, 0.0);
    for (v, w) in values.iter().zip(weights) {
        if v.is_finite() && w.is_finite() && *w > 0.0 {
            num += v * w;
            den += w;
        }
    }
    (den > 0.0).then(|| num / den)
}

/// Collapse a per-band sample to one value according to the robust settings
pub fn aggregate(values: &[f64], robust: &RobustParams) -> Option<f64> {
    match robust.aggregate {
        Aggregate::Quantile => quantile(values, robust.aggregate_quantile),
        Aggregate::Mean => mean(values),
    }
}

/// Absolute energy (Pa²) to dB re 20 µPa
pub fn pa2_to_db(energy: f64) -> f64 {
    10.0 * (energy / (PA0 * PA0)).log10()
}

/// dB re 20 µPa to Pa²
pub fn db_to_pa2(level_db: f64) -> f64 {
    PA0 * PA0 * 10f64.powf(level_db / 10.0)
}

/// Energetic sum of two levels
pub fn db_add(a: f64, b: f64) -> f64 {
    10.0 * (10f64.powf(a / 10.0) + 10f64.powf(b / 10.0)).log10()
}

/// Energetic difference `raw − env`, floored at `raw − floor_db`
pub fn db_subtract(raw: f64, env: f64, floor_db: f64) -> f64 {
    let diff = 10f64.powf(raw / 10.0) - 10f64.powf(env / 10.0);
    let floor = raw - floor_db;
    if diff > 0.0 {
        (10.0 * diff.log10()).max(floor)
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert_eq!(median(&v), Some(2.5));
        assert!((percentile(&v, 30.0).unwrap() - 1.9).abs() < 1e-12);
        assert_eq!(quantile(&[f64::NAN], 0.5), None);
    }

    #[test]
    fn mad_and_clipping() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(mad(&v), Some(1.0));
        let kept = mad_clip(&v, 3.0);
        assert_eq!(kept, vec![1.0, 2.0, 3.0, 4.0]);

        let flat = [2.0, 2.0, 2.0, 9.0];
        assert_eq!(mad_clip(&flat, 3.0).len(), 4);
    }

    #[test]
    fn aggregate_modes() {
        let v = [1.0, 2.0, 9.0];
        let mut robust = RobustParams::default();
        assert_eq!(aggregate(&v, &robust), Some(2.0));
        robust.aggregate = Aggregate::Mean;
        assert_eq!(aggregate(&v, &robust), Some(4.0));
    }

    #[test]
    fn level_arithmetic() {
        assert!((pa2_to_db(db_to_pa2(47.3)) - 47.3).abs() < 1e-12);
        assert!((db_add(30.0, 30.0) - 33.0103).abs() < 1e-4);
        assert!((db_subtract(33.0103, 30.0, 20.0) - 30.0).abs() < 1e-3);
        assert_eq!(db_subtract(30.0, 31.0, 20.0), 10.0);
    }

    #[test]
    fn weighted_mean_skips_zero_weight() {
        assert_eq!(weighted_mean(&[1.0, 3.0, 100.0], &[1.0, 1.0, 0.0]), Some(2.0));
        assert_eq!(weighted_mean(&[1.0], &[0.0]), None);
    }
}
