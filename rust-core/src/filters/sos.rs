//! Second-order-section (biquad cascade) filtering

use num_complex::Complex64;
use std::f64::consts::PI;

/// One biquad section, `a[0]` normalised to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    pub fn new(b: [f64; 3], a: [f64; 3]) -> Self {
        Self { b, a }
    }

    /// Complex response H(e^jω) at `freq_hz`
    pub fn response(&self, freq_hz: f64, sample_rate: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -2.0 * PI * freq_hz / sample_rate);
        let z2 = z1 * z1;
        let num = self.b[0] + z1 * self.b[1] + z2 * self.b[2];
        let den = self.a[0] + z1 * self.a[1] + z2 * self.a[2];
        num / den
    }

    /// Rescale the numerator so |H| = 1 at `freq_hz`
    pub fn normalized_at(mut self, freq_hz: f64, sample_rate: f64) -> Self {
        let gain = self.response(freq_hz, sample_rate).norm();
        if gain > 0.0 && gain.is_finite() {
            for b in self.b.iter_mut() {
                *b /= gain;
            }
        }
        self
    }
}

/// Cascade of biquads applied with transposed direct form II
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<Biquad>,
}

impl SosFilter {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.response(freq_hz, sample_rate).norm())
            .product()
    }

    /// Filter a whole signal from rest
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut out = input.to_vec();
        self.apply_inplace(&mut out);
        out
    }

    pub fn apply_inplace(&self, buffer: &mut [f64]) {
        for s in &self.sections {
            let (mut z1, mut z2) = (0.0, 0.0);
            for x in buffer.iter_mut() {
                let y = s.b[0] * *x + z1;
                z1 = s.b[1] * *x - s.a[1] * y + z2;
                z2 = s.b[2] * *x - s.a[2] * y;
                *x = y;
            }
        }
    }
}
