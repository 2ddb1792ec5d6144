//! Piecewise cubic Hermite interpolation with Fritsch–Carlson slopes
//!
//! Shape preserving: no overshoot between anchors, monotone data gives a
//! monotone curve. Queries outside the anchor range are clamped to the ends.

use serde::{Deserialize, Serialize};

/// Relative tolerance under which two x values are treated as one anchor
const MERGE_RTOL: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pchip {
    xs: Vec<f64>,
    ys: Vec<f64>,
    slopes: Vec<f64>,
}

impl Pchip {
    /// Fit a curve through `(x, y)` anchors.
    ///
    /// Anchors are sorted, non-finite pairs dropped and near-duplicate x merged
    /// by averaging. With `nonneg_slope` every derivative is clamped at zero.
    pub fn fit(x: &[f64], y: &[f64], nonneg_slope: bool) -> Self {
        let mut pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y)
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a, b))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (xs, ys) = merge_duplicates(&pairs);
        let mut slopes = fritsch_carlson(&xs, &ys);
        if nonneg_slope {
            for d in &mut slopes {
                *d = d.max(0.0);
            }
        }
        Self { xs, ys, slopes }
    }

    /// Evaluate at `x` (clamped into the anchor domain)
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        match n {
            0 => return f64::NAN,
            1 => return self.ys[0],
            _ => {}
        }
        if x.is_nan() {
            return f64::NAN;
        }
        let x = x.clamp(self.xs[0], self.xs[n - 1]);

        // segment i such that xs[i] <= x < xs[i+1]; the last anchor maps to the last segment
        let i = self.xs.partition_point(|&xi| xi <= x).saturating_sub(1).min(n - 2);
        let h = self.xs[i + 1] - self.xs[i];
        let t = (x - self.xs[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        h00 * self.ys[i]
            + h10 * h * self.slopes[i]
            + h01 * self.ys[i + 1]
            + h11 * h * self.slopes[i + 1]
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// `(x_min, x_max)` of the anchors
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((*self.xs.first()?, *self.xs.last()?))
    }
}

fn merge_duplicates(sorted: &[(f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let mut xs: Vec<f64> = Vec::with_capacity(sorted.len());
    let mut ys: Vec<f64> = Vec::with_capacity(sorted.len());
    let mut i = 0;
    while i < sorted.len() {
        let x0 = sorted[i].0;
        let tol = MERGE_RTOL * x0.abs().max(1.0);
        let mut j = i;
        let (mut sx, mut sy) = (0.0, 0.0);
        while j < sorted.len() && sorted[j].0 - x0 <= tol {
            sx += sorted[j].0;
            sy += sorted[j].1;
            j += 1;
        }
        let count = (j - i) as f64;
        xs.push(sx / count);
        ys.push(sy / count);
        i = j;
    }
    (xs, ys)
}

fn fritsch_carlson(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();
    if n == 2 {
        return vec![delta[0]; 2];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        let (a, b) = (delta[k - 1], delta[k]);
        if a * b <= 0.0 {
            continue;
        }
        // weighted harmonic mean
        let w1 = 2.0 * h[k] + h[k - 1];
        let w2 = h[k] + 2.0 * h[k - 1];
        d[k] = (w1 + w2) / (w1 / a + w2 / b);
    }
    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// Three-point end derivative, limited to keep the end segment shape preserving
fn end_slope(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if d.signum() != m0.signum() || m0 == 0.0 {
        0.0
    } else if m0.signum() != m1.signum() && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_anchors() {
        let x = [1000.0, 1250.0, 1500.0, 1800.0, 2000.0];
        let y = [40.0, 43.5, 44.0, 49.0, 52.5];
        let p = Pchip::fit(&x, &y, false);
        for (xi, yi) in x.iter().zip(y) {
            assert!((p.eval(*xi) - yi).abs() < 1e-12);
        }
    }

    #[test]
    fn monotone_input_stays_monotone() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.0, 0.1, 5.0, 5.1, 5.1, 9.0];
        let p = Pchip::fit(&x, &y, true);
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=500 {
            let v = p.eval(i as f64 / 100.0);
            assert!(v >= prev - 1e-12, "dip at {i}");
            prev = v;
        }
    }

    #[test]
    fn no_overshoot_between_anchors() {
        let p = Pchip::fit(&[0.0, 1.0, 2.0, 3.0], &[0.0, 0.0, 1.0, 1.0], false);
        for i in 0..=300 {
            let v = p.eval(i as f64 / 100.0);
            assert!((-1e-12..=1.0 + 1e-12).contains(&v));
        }
    }

    #[test]
    fn degenerate_inputs() {
        let empty = Pchip::fit(&[], &[], false);
        assert!(empty.is_empty());
        assert!(empty.eval(1.0).is_nan());
        assert!(empty.domain().is_none());

        let single = Pchip::fit(&[5.0], &[3.0], false);
        assert_eq!(single.eval(-100.0), 3.0);
        assert_eq!(single.eval(100.0), 3.0);

        let line = Pchip::fit(&[0.0, 2.0], &[1.0, 5.0], false);
        assert!((line.eval(1.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_domain() {
        let p = Pchip::fit(&[1.0, 2.0, 3.0], &[10.0, 20.0, 25.0], false);
        assert_eq!(p.eval(0.0), 10.0);
        assert_eq!(p.eval(99.0), 25.0);
    }

    #[test]
    fn merges_duplicates_and_drops_nan() {
        let xs = [2.0, 1.0, 1.0 + 1e-12, 3.0, 4.0];
        let p = Pchip::fit(&xs, &[4.0, 1.0, 3.0, f64::NAN, 8.0], false);
        assert_eq!(p.len(), 3);
        assert!((p.eval(1.0) - 2.0).abs() < 1e-9);
        assert_eq!(p.xs()[2], 4.0);
    }

    #[test]
    fn serde_round_trip_keeps_curve() {
        let p = Pchip::fit(&[0.0, 1.0, 3.0], &[1.0, 2.0, 0.5], false);
        let json = serde_json::to_string(&p).unwrap();
        let back: Pchip = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
