//! Band filter design
//!
//! Two families are supported for the persistent band bank:
//! - windowed-sinc FIR bandpass, length inversely scaled to band bandwidth
//! - Butterworth bandpass/highpass via bilinear transform, emitted as
//!   second-order sections

use super::sos::{Biquad, SosFilter};
use super::windows::{generate_window, WindowType};
use num_complex::Complex64;
use std::f64::consts::PI;

/// Design a bandpass FIR filter using the windowing method
///
/// # Arguments
/// * `lo_hz`, `hi_hz` - Band edges in Hz (cutoffs sit mid-transition)
/// * `sample_rate` - Sample rate in Hz
/// * `transition` - Transition width as a fraction of the bandwidth
/// * `window_type` - Window applied to the ideal response
/// * `max_taps` - Upper bound on the filter length
///
/// # Returns
/// Odd-length symmetric coefficients h[n]
pub fn design_bandpass_fir(
    lo_hz: f64,
    hi_hz: f64,
    sample_rate: f64,
    transition: f64,
    window_type: WindowType,
    max_taps: usize,
) -> Vec<f64> {
    let bandwidth = hi_hz - lo_hz;
    let delta_omega = 2.0 * PI * bandwidth * transition / sample_rate;
    let mut m = window_type.calculate_filter_length(delta_omega).min(max_taps);
    if m % 2 == 0 {
        m -= 1;
    }

    let wc1 = 2.0 * PI * lo_hz / sample_rate;
    let wc2 = 2.0 * PI * hi_hz / sample_rate;
    let window = generate_window(window_type, m);
    let center = (m - 1) as f64 / 2.0;

    // h_ideal[n] = (sin(wc2*n) - sin(wc1*n)) / (π*n), (wc2 - wc1)/π at n = 0
    (0..m)
        .map(|n| {
            let k = n as f64 - center;
            let ideal = if k.abs() < 1e-10 {
                (wc2 - wc1) / PI
            } else {
                ((wc2 * k).sin() - (wc1 * k).sin()) / (PI * k)
            };
            ideal * window[n]
        })
        .collect()
}

/// Complex frequency response of FIR coefficients at `freq_hz`
pub fn fir_response(h: &[f64], freq_hz: f64, sample_rate: f64) -> Complex64 {
    let omega = 2.0 * PI * freq_hz / sample_rate;
    h.iter()
        .enumerate()
        .map(|(n, &h_n)| h_n * Complex64::from_polar(1.0, -omega * n as f64))
        .sum()
}

/// Analog Butterworth prototype poles on the unit circle (left half-plane)
fn prototype_poles(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect()
}

fn prewarp(freq_hz: f64, sample_rate: f64) -> f64 {
    2.0 * sample_rate * (PI * freq_hz / sample_rate).tan()
}

fn bilinear(s: Complex64, sample_rate: f64) -> Complex64 {
    let k = 2.0 * sample_rate;
    (k + s) / (k - s)
}

/// Group digital poles into conjugate pairs and real pairs. Leftover real
/// poles (odd highpass orders) come back as singletons.
fn pair_poles(poles: &[Complex64]) -> Vec<Vec<Complex64>> {
    const IMAG_EPS: f64 = 1e-12;
    let mut groups = Vec::new();
    let mut reals: Vec<Complex64> = Vec::new();

    for &p in poles {
        if p.im > IMAG_EPS {
            groups.push(vec![p, p.conj()]);
        } else if p.im.abs() <= IMAG_EPS {
            reals.push(Complex64::new(p.re, 0.0));
        }
    }
    reals.sort_by(|a, b| a.re.total_cmp(&b.re));
    for chunk in reals.chunks(2) {
        groups.push(chunk.to_vec());
    }
    groups
}

fn denominator(group: &[Complex64]) -> [f64; 3] {
    match group {
        [p] => [1.0, -p.re, 0.0],
        [p, q] => [1.0, -(p + q).re, (p * q).re],
        _ => [1.0, 0.0, 0.0],
    }
}

/// Design a Butterworth bandpass of prototype order `order` between `lo_hz`
/// and `hi_hz`. Produces `order` biquads, each with zeros at DC and Nyquist,
/// individually normalised to unit gain at the band center.
pub fn design_butterworth_bandpass(
    order: usize,
    lo_hz: f64,
    hi_hz: f64,
    sample_rate: f64,
) -> SosFilter {
    let w1 = prewarp(lo_hz, sample_rate);
    let w2 = prewarp(hi_hz, sample_rate);
    let w0_sq = w1 * w2;
    let bw = w2 - w1;

    // s^2 - p*B*s + w0^2 = 0 for every prototype pole p
    let mut digital = Vec::with_capacity(2 * order);
    for p in prototype_poles(order) {
        let pb = p * bw;
        let disc = (pb * pb - 4.0 * w0_sq).sqrt();
        for s in [(pb + disc) / 2.0, (pb - disc) / 2.0] {
            digital.push(bilinear(s, sample_rate));
        }
    }

    // Digital image of the analog center w0
    let center = sample_rate / PI * (w0_sq.sqrt() / (2.0 * sample_rate)).atan();
    let sections = pair_poles(&digital)
        .iter()
        .map(|group| {
            let section = Biquad::new([1.0, 0.0, -1.0], denominator(group));
            section.normalized_at(center, sample_rate)
        })
        .collect();
    SosFilter::new(sections)
}

/// Design a Butterworth highpass with cutoff `cutoff_hz`, unit gain at Nyquist.
pub fn design_butterworth_highpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> SosFilter {
    let wc = prewarp(cutoff_hz, sample_rate);
    let digital: Vec<Complex64> = prototype_poles(order)
        .into_iter()
        .map(|p| bilinear(wc / p, sample_rate))
        .collect();

    let nyquist = sample_rate / 2.0;
    let sections = pair_poles(&digital)
        .iter()
        .map(|group| {
            let b = if group.len() == 1 {
                [1.0, -1.0, 0.0]
            } else {
                [1.0, -2.0, 1.0]
            };
            Biquad::new(b, denominator(group)).normalized_at(nyquist, sample_rate)
        })
        .collect();
    SosFilter::new(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fir_bandpass_symmetric_and_zero_dc() {
        let h = design_bandpass_fir(900.0, 1100.0, 16_000.0, 0.5, WindowType::Hamming, 8191);
        assert_eq!(h.len() % 2, 1);
        for i in 0..h.len() / 2 {
            assert!((h[i] - h[h.len() - 1 - i]).abs() < 1e-12);
        }
        let sum: f64 = h.iter().sum();
        assert!(sum.abs() < 0.05, "DC gain too large: {sum}");
    }

    #[test]
    fn test_fir_passband_and_stopband() {
        let fs = 16_000.0;
        let h = design_bandpass_fir(707.0, 1414.0, fs, 0.5, WindowType::Hamming, 8191);
        let pass = fir_response(&h, 1000.0, fs).norm();
        let stop = fir_response(&h, 4000.0, fs).norm();
        assert!((pass - 1.0).abs() < 0.05, "passband gain {pass}");
        assert!(stop < 0.01, "stopband gain {stop}");
    }

    #[test]
    fn test_fir_length_capped() {
        let h = design_bandpass_fir(20.0, 22.0, 48_000.0, 0.5, WindowType::Hamming, 1001);
        assert_eq!(h.len(), 1001);
    }

    #[test]
    fn test_butterworth_bandpass_shape() {
        let fs = 48_000.0;
        let bp = design_butterworth_bandpass(4, 891.0, 1122.0, fs);
        assert_eq!(bp.sections().len(), 4);

        let center = bp.magnitude_at((891.0f64 * 1122.0).sqrt(), fs);
        assert!((center - 1.0).abs() < 1e-3, "center gain {center}");

        // -3 dB at the edges
        let edge = bp.magnitude_at(891.0, fs);
        assert!((edge - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.02, "edge gain {edge}");

        assert!(bp.magnitude_at(250.0, fs) < 1e-3);
        assert!(bp.magnitude_at(4000.0, fs) < 1e-3);
    }

    #[test]
    fn test_butterworth_highpass() {
        let fs = 16_000.0;
        for order in [1, 2, 3] {
            let hp = design_butterworth_highpass(order, 100.0, fs);
            assert_eq!(hp.sections().len(), (order + 1) / 2);
            let cutoff = hp.magnitude_at(100.0, fs);
            assert!(
                (cutoff - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.01,
                "order {order}: {cutoff}"
            );
            assert!(hp.magnitude_at(10.0, fs) < 0.2);
            assert!((hp.magnitude_at(2000.0, fs) - 1.0).abs() < 0.01);
        }
    }
}
