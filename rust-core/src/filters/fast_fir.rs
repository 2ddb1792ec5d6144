//! FFT-based fast convolution for long FIR band filters
//!
//! Implements overlap-add method with frequency-domain multiplication
//! Complexity: O(N log N) vs O(N*M) for time-domain

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// FFT-based FIR filter for long impulse responses
///
/// The coefficient spectrum is computed once, so a designed filter can be
/// reused across every recording that shares its design key.
pub struct FastFirFilter {
    /// Filter coefficients in frequency domain
    h_fft: Vec<Complex<f64>>,

    /// FFT size (power of 2, >= block_size + filter_length - 1)
    fft_size: usize,

    /// Block size for input
    block_size: usize,

    /// Filter length
    filter_length: usize,

    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FastFirFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastFirFilter")
            .field("fft_size", &self.fft_size)
            .field("block_size", &self.block_size)
            .field("filter_length", &self.filter_length)
            .finish()
    }
}

impl FastFirFilter {
    /// Create new FFT-based filter
    ///
    /// # Arguments
    /// * `coefficients` - Filter coefficients h[n]
    /// * `block_size` - Input block size; the FFT size is the next power of
    ///   two >= block_size + filter_length - 1
    pub fn new(coefficients: &[f64], block_size: usize) -> Self {
        let filter_length = coefficients.len().max(1);
        let block_size = block_size.max(1);
        let fft_size = (block_size + filter_length - 1).next_power_of_two();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let mut h_fft = vec![Complex::new(0.0, 0.0); fft_size];
        for (slot, &coeff) in h_fft.iter_mut().zip(coefficients) {
            *slot = Complex::new(coeff, 0.0);
        }
        fft.process(&mut h_fft);

        Self {
            h_fft,
            fft_size,
            block_size,
            filter_length,
            fft,
            ifft,
        }
    }

    /// Causal convolution of a whole signal, same length as input
    ///
    /// Blocks are transformed, multiplied by the filter spectrum and
    /// overlap-added into the output.
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut output = vec![0.0; input.len()];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.fft_size];
        let scale = 1.0 / self.fft_size as f64;

        for (block_idx, block) in input.chunks(self.block_size).enumerate() {
            let offset = block_idx * self.block_size;

            buffer.fill(Complex::new(0.0, 0.0));
            for (slot, &x) in buffer.iter_mut().zip(block) {
                *slot = Complex::new(x, 0.0);
            }

            self.fft.process(&mut buffer);
            for (b, h) in buffer.iter_mut().zip(&self.h_fft) {
                *b *= h;
            }
            self.ifft.process(&mut buffer);

            let produced = block.len() + self.filter_length - 1;
            for (i, b) in buffer.iter().take(produced).enumerate() {
                if let Some(out) = output.get_mut(offset + i) {
                    *out += b.re * scale;
                }
            }
        }

        output
    }

    /// Get filter length
    pub fn filter_length(&self) -> usize {
        self.filter_length
    }

    /// Get block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
