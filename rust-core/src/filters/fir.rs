//! Direct-form FIR convolution for short band filters

/// FIR filter applied by direct convolution, O(N*M)
///
/// Cheaper than the FFT path when the filter has only a few dozen taps.
#[derive(Debug, Clone, PartialEq)]
pub struct FirFilter {
    /// Filter coefficients h[n]
    coefficients: Vec<f64>,
}

impl FirFilter {
    /// Create a new FIR filter with given coefficients
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    /// Causal convolution y[n] = Σ h[k] * x[n-k], same length as input
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let h = &self.coefficients;
        (0..input.len())
            .map(|n| {
                let taps = h.len().min(n + 1);
                (0..taps).map(|k| h[k] * input[n - k]).sum()
            })
            .collect()
    }

    /// Get filter coefficients
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Get filter length
    pub fn length(&self) -> usize {
        self.coefficients.len()
    }

    /// Get group delay (for linear phase Type I FIR)
    pub fn group_delay_samples(&self) -> f64 {
        (self.length().max(1) - 1) as f64 / 2.0
    }
}
