//! Fractional-octave band grid
//!
//! Exact centers follow IEC 61260 (base-ten or base-two octave ratio around
//! 1 kHz, half-band offset for even densities). Nominal centers are snapped to
//! the R40 preferred-number series. Bands whose upper edge reaches the
//! Nyquist-limited design range are kept in the layout but marked unusable.

use crate::config::{BandGrid, BandParams};
use serde::{Deserialize, Serialize};

/// R40 preferred-number mantissas within one decade
const R40: [f64; 41] = [
    1.00, 1.06, 1.12, 1.18, 1.25, 1.32, 1.40, 1.50, 1.60, 1.70, 1.80, 1.90, 2.00, 2.12, 2.24, 2.36,
    2.50, 2.65, 2.80, 3.00, 3.15, 3.35, 3.55, 3.75, 4.00, 4.25, 4.50, 4.75, 5.00, 5.30, 5.60, 6.00,
    6.30, 6.70, 7.10, 7.50, 8.00, 8.50, 9.00, 9.50, 10.0,
];

const REFERENCE_HZ: f64 = 1000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Band {
    /// Preferred-number label, e.g. 31.5 or 1250
    pub nominal: f64,
    /// Exact geometric center the edges are built from
    pub center: f64,
    pub lo: f64,
    pub hi: f64,
    /// False when the band cannot be designed below Nyquist
    pub usable: bool,
}

impl Band {
    pub fn bandwidth(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.lo && freq_hz < self.hi
    }
}

/// Octave ratio for the chosen grid
pub fn octave_ratio(grid: BandGrid) -> f64 {
    match grid {
        BandGrid::Base10 => 10f64.powf(0.3),
        BandGrid::Base2 => 2.0,
    }
}

/// Half-band factor g, so edges are `center / g` and `center * g`
pub fn grid_factor(grid: BandGrid, bands_per_octave: u32) -> f64 {
    octave_ratio(grid).powf(1.0 / (2.0 * bands_per_octave as f64))
}

/// Log-symmetric edges around `center`
pub fn band_edges(center: f64, g: f64) -> (f64, f64) {
    (center / g, center * g)
}

/// Snap to the nearest preferred number of the same decade
pub fn preferred_number(freq_hz: f64, bands_per_octave: u32) -> f64 {
    let decade = 10f64.powi(freq_hz.log10().floor() as i32);
    if bands_per_octave > 12 {
        let step = decade / 100.0;
        return (freq_hz / step).round() * step;
    }
    let mantissa = freq_hz / decade;
    let best = R40
        .iter()
        .copied()
        .min_by(|a, b| (mantissa / a).ln().abs().total_cmp(&(mantissa / b).ln().abs()))
        .unwrap_or(mantissa);
    best * decade
}

/// Exact band centers between `fmin` and `fmax` (inclusive on nominal values)
pub fn exact_centers(grid: BandGrid, bands_per_octave: u32, fmin: f64, fmax: f64) -> Vec<f64> {
    let ratio = octave_ratio(grid);
    let b = bands_per_octave as f64;
    let exponent = |k: i64| {
        if bands_per_octave % 2 == 1 {
            k as f64 / b
        } else {
            (2 * k + 1) as f64 / (2.0 * b)
        }
    };

    let k_lo = ((fmin / REFERENCE_HZ).log(ratio) * b).floor() as i64 - 1;
    let k_hi = ((fmax / REFERENCE_HZ).log(ratio) * b).ceil() as i64 + 1;
    let tol = 1e-9;

    (k_lo..=k_hi)
        .map(|k| REFERENCE_HZ * ratio.powf(exponent(k)))
        .filter(|&f| {
            let nominal = preferred_number(f, bands_per_octave);
            nominal >= fmin * (1.0 - tol) && nominal <= fmax * (1.0 + tol)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BandLayout {
    pub grid: BandGrid,
    pub bands_per_octave: u32,
    pub sample_rate: u32,
    pub g: f64,
    pub bands: Vec<Band>,
}

impl BandLayout {
    pub fn new(params: &BandParams, sample_rate: u32) -> Self {
        let g = grid_factor(params.grid, params.bands_per_octave);
        let design_limit = params.nyquist_margin * sample_rate as f64 / 2.0;

        let bands = exact_centers(params.grid, params.bands_per_octave, params.fmin, params.fmax)
            .into_iter()
            .map(|center| {
                let (lo, hi) = band_edges(center, g);
                Band {
                    nominal: preferred_number(center, params.bands_per_octave),
                    center,
                    lo,
                    hi,
                    usable: lo > 0.0 && hi < design_limit,
                }
            })
            .collect();

        Self {
            grid: params.grid,
            bands_per_octave: params.bands_per_octave,
            sample_rate,
            g,
            bands,
        }
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn centers(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.center).collect()
    }

    pub fn nominal_centers(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.nominal).collect()
    }

    pub fn usable(&self) -> Vec<bool> {
        self.bands.iter().map(|b| b.usable).collect()
    }

    /// Index of the usable band whose edge interval contains `freq_hz`
    pub fn band_containing(&self, freq_hz: f64) -> Option<usize> {
        self.bands.iter().position(|b| b.usable && b.contains(freq_hz))
    }
}
