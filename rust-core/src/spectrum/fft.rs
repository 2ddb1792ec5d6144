//! Periodogram engine using realfft for real-valued frames

use crate::error::{CalibError, Result};
use crate::filters::windows::{generate_window, window_power, WindowType};
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// One-sided power spectral density estimator for fixed-length frames
pub struct PsdEngine {
    /// Frame length (number of samples)
    frame_len: usize,

    sample_rate: f64,

    /// Real FFT processor
    r2c: Arc<dyn RealToComplex<f64>>,

    window: Vec<f64>,

    /// Σ w[n]²
    window_power: f64,

    /// Reusable input buffer
    input_buffer: Vec<f64>,

    /// Reusable output buffer (complex spectrum)
    output_buffer: Vec<num_complex::Complex<f64>>,

    /// Reusable density buffer
    psd: Vec<f64>,
}

impl PsdEngine {
    /// Create a Hann-windowed periodogram for `frame_len` samples
    pub fn new(frame_len: usize, sample_rate: f64) -> Self {
        Self::with_window(frame_len, sample_rate, WindowType::Hann)
    }

    pub fn with_window(frame_len: usize, sample_rate: f64, window_type: WindowType) -> Self {
        let frame_len = frame_len.max(2);
        let mut planner = RealFftPlanner::<f64>::new();
        let r2c = planner.plan_fft_forward(frame_len);
        let window = generate_window(window_type, frame_len);
        let window_power = window_power(&window);

        Self {
            frame_len,
            sample_rate,
            input_buffer: r2c.make_input_vec(),
            output_buffer: r2c.make_output_vec(),
            r2c,
            window,
            window_power,
            psd: vec![0.0; frame_len / 2 + 1],
        }
    }

    /// Density P[k] in units²/Hz such that Σ P[k]·Δf equals the frame's mean square
    ///
    /// # Arguments
    /// * `frame` - Input samples (zero-padded if shorter than the frame length)
    pub fn density(&mut self, frame: &[f64]) -> Result<&[f64]> {
        let copy_len = frame.len().min(self.frame_len);
        for (i, slot) in self.input_buffer.iter_mut().enumerate() {
            *slot = if i < copy_len { frame[i] * self.window[i] } else { 0.0 };
        }

        self.r2c
            .process(&mut self.input_buffer, &mut self.output_buffer)
            .map_err(|e| CalibError::Numeric(format!("FFT processing failed: {e}")))?;

        let norm = 1.0 / (self.sample_rate * self.window_power);
        let last = self.output_buffer.len() - 1;
        let even = self.frame_len % 2 == 0;
        for (k, (p, c)) in self.psd.iter_mut().zip(&self.output_buffer).enumerate() {
            // DC and (for even lengths) Nyquist appear once in the one-sided spectrum
            let one_sided = if k == 0 || (even && k == last) { 1.0 } else { 2.0 };
            *p = c.norm_sqr() * norm * one_sided;
        }
        Ok(&self.psd)
    }

    /// Frame length
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of frequency bins (frame_len/2 + 1 for real FFT)
    pub fn num_bins(&self) -> usize {
        self.frame_len / 2 + 1
    }

    /// Bin spacing Δf in Hz
    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate / self.frame_len as f64
    }

    /// Convert bin index to Hz
    pub fn bin_to_hz(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_width_hz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_density_integrates_to_mean_square() {
        let fs = 8000.0;
        let n = 4000;
        let mut engine = PsdEngine::new(n, fs);

        // 1 kHz sine of amplitude 2 has mean square 2
        let signal: Vec<f64> = (0..n)
            .map(|i| 2.0 * (2.0 * PI * 1000.0 * i as f64 / fs).sin())
            .collect();
        let df = engine.bin_width_hz();
        let psd = engine.density(&signal).unwrap();
        let total: f64 = psd.iter().sum::<f64>() * df;
        assert!((total - 2.0).abs() < 0.01, "total {total}");
    }

    #[test]
    fn test_sine_peak_bin() {
        let fs = 8000.0;
        let n = 1024;
        let mut engine = PsdEngine::new(n, fs);
        let signal: Vec<f64> = (0..n).map(|i| (2.0 * PI * 1000.0 * i as f64 / fs).sin()).collect();
        let psd = engine.density(&signal).unwrap().to_vec();

        let (peak_bin, _) = psd
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap();
        assert!((engine.bin_to_hz(peak_bin) - 1000.0).abs() <= engine.bin_width_hz());
    }

    #[test]
    fn test_frequency_axis() {
        let engine = PsdEngine::new(1024, 48_000.0);
        assert_eq!(engine.num_bins(), 513);
        assert_eq!(engine.bin_to_hz(0), 0.0);
        assert!((engine.bin_to_hz(512) - 24_000.0).abs() < 1e-9);
    }
}
