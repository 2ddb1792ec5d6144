//! Window functions for FIR band design and periodogram framing

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Window function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowType {
    /// Hann window: w[n] = 0.5 - 0.5*cos(2πn/(M-1))
    /// Mainlobe width: 8π/M, Sidelobe attenuation: ~44 dB
    Hann,

    /// Hamming window: w[n] = 0.54 - 0.46*cos(2πn/(M-1))
    /// Mainlobe width: 8π/M, Sidelobe attenuation: ~53 dB
    Hamming,
}

impl WindowType {
    /// Mainlobe width factor A, where the mainlobe spans Aπ/M rad/sample
    pub fn mainlobe_width_factor(&self) -> f64 {
        match self {
            WindowType::Hann | WindowType::Hamming => 8.0,
        }
    }

    /// Filter length M needed for a transition width of `delta_omega` rad/sample
    /// (Oppenheim & Schafer, Table 7.1). Always odd so the filter is Type I.
    ///
    /// Narrow bands ask for narrow transitions, so the length grows inversely
    /// with band bandwidth.
    pub fn calculate_filter_length(&self, delta_omega: f64) -> usize {
        let m = (self.mainlobe_width_factor() * PI / delta_omega).ceil() as usize;
        let m = m.max(3);
        if m % 2 == 0 {
            m + 1
        } else {
            m
        }
    }
}

/// Generate symmetric window coefficients w[n] for n = 0..length-1
pub fn generate_window(window_type: WindowType, length: usize) -> Vec<f64> {
    if length <= 1 {
        return vec![1.0; length];
    }
    let denom = (length - 1) as f64;

    (0..length)
        .map(|n| {
            let angle = 2.0 * PI * n as f64 / denom;
            match window_type {
                WindowType::Hann => 0.5 - 0.5 * angle.cos(),
                WindowType::Hamming => 0.54 - 0.46 * angle.cos(),
            }
        })
        .collect()
}

/// Sum of squared window coefficients, the periodogram density normaliser
pub fn window_power(window: &[f64]) -> f64 {
    window.iter().map(|w| w * w).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_length_calculation() {
        let delta_omega = 0.05 * PI;

        assert_eq!(WindowType::Hann.calculate_filter_length(delta_omega), 161);
        assert_eq!(WindowType::Hamming.calculate_filter_length(delta_omega), 161);
    }

    #[test]
    fn test_length_grows_as_transition_narrows() {
        let wide = WindowType::Hamming.calculate_filter_length(0.1 * PI);
        let narrow = WindowType::Hamming.calculate_filter_length(0.01 * PI);
        assert!(narrow > 5 * wide);
        assert_eq!(narrow % 2, 1);
    }

    #[test]
    fn test_window_generation() {
        let length = 161;
        for kind in [WindowType::Hann, WindowType::Hamming] {
            let w = generate_window(kind, length);
            assert_eq!(w.len(), length);
            assert!((w[0] - w[length - 1]).abs() < 1e-10);
            assert!((w[length / 2] - 1.0).abs() < 1e-10);
        }

        let hamming = generate_window(WindowType::Hamming, length);
        assert!(hamming[0] > 0.07 && hamming[0] < 0.09);
    }

    #[test]
    fn test_window_power() {
        assert_eq!(window_power(&[1.0; 100]), 100.0);

        // Hann power is 3/8 of the length asymptotically
        let hann = generate_window(WindowType::Hann, 10_001);
        assert!((window_power(&hann) / 10_001.0 - 0.375).abs() < 1e-3);

        // Hamming: 0.54² + 0.46² / 2
        let hamming = generate_window(WindowType::Hamming, 10_001);
        assert!((window_power(&hamming) / 10_001.0 - 0.3974).abs() < 1e-3);
    }
}
