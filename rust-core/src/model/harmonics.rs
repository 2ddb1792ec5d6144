//! Blade-passing-frequency harmonic model
//!
//! Extraction measures, per harmonic order and RPM bin, how far the band that
//! holds the line sits above its neighborhood. Injection puts that energy back
//! at query time, spread over the nearest bands in log frequency.

use crate::calibration::stats::{db_to_pa2, median, pa2_to_db};
use crate::config::CalibrationParams;
use crate::error::{CalibError, Result};
use crate::interp::Pchip;
use crate::spectrum::bands::BandLayout;
use crate::spectrum::framing::BandFrames;
use crate::sweep::binning::bin_centers;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Most bands a single line is spread over
const INJECTION_BANDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicOrder {
    pub order: usize,
    /// RPM → line level, dB re 20 µPa
    pub curve: Pchip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicModel {
    pub blades: u32,
    pub orders: Vec<HarmonicOrder>,
    /// Injection kernel width, octaves
    pub sigma_oct: f64,
}

/// Line frequency of order `h`
pub fn line_hz(order: usize, blades: u32, rpm: f64) -> f64 {
    order as f64 * blades as f64 * rpm / 60.0
}

/// Highest order whose line stays inside the usable band range at `rpm_max`
pub fn max_order(blades: u32, rpm_max: f64, layout: &BandLayout, cap: usize) -> usize {
    let Some(f_lim) = layout.bands.iter().filter(|b| b.usable).map(|b| b.hi).reduce(f64::max) else {
        return 0;
    };
    let per_order = line_hz(1, blades, rpm_max);
    if !(per_order > 0.0) {
        return 0;
    }
    ((f_lim / per_order).floor() as usize).min(cap)
}

/// Median of the usable neighbors within `reach` bands of `band`
fn neighborhood(row: &[f64], usable: &[bool], band: usize, reach: usize) -> Option<f64> {
    let lo = band.saturating_sub(reach);
    let hi = (band + reach).min(row.len() - 1);
    let around: Vec<f64> = (lo..=hi)
        .filter(|&k| k != band && usable[k] && row[k].is_finite() && row[k] > 0.0)
        .map(|k| row[k])
        .collect();
    median(&around)
}

pub struct HarmonicExtraction {
    pub model: HarmonicModel,
    /// Input frames with the extracted line energy removed
    pub stripped: BandFrames,
}

/// Extract harmonic curves from absolute sweep frames.
///
/// `rpm` is the per-frame track and `eligible` the frames allowed into bins.
pub fn extract(
    frames: &BandFrames,
    rpm: &[f64],
    eligible: &[usize],
    layout: &BandLayout,
    rpm_range: (f64, f64),
    params: &CalibrationParams,
) -> Result<HarmonicExtraction> {
    let hp = &params.harmonics;
    let blades = hp
        .blades
        .ok_or_else(|| CalibError::Numeric("harmonic extraction needs a blade count".into()))?;
    let n_orders = max_order(blades, rpm_range.1, layout, hp.max_order);
    if n_orders == 0 {
        return Err(CalibError::Numeric(
            "no harmonic order fits below the usable band limit".into(),
        ));
    }
    let reach = hp.neighbor_bands.max(1);
    let snr_gate = params.sweep.snr_lo_db;

    // line[i][h-1]: energy of order h in frame i
    let mut stripped = frames.clone();
    let mut line = vec![vec![0.0; n_orders]; frames.n_frames()];
    for &i in eligible {
        let row: Vec<f64> = frames.row(i).to_vec();
        let mut claimed: Vec<usize> = Vec::with_capacity(n_orders);
        for h in 1..=n_orders {
            let Some(b) = layout.band_containing(line_hz(h, blades, rpm[i])) else {
                continue;
            };
            // a band already attributed to a lower order is not counted twice
            if claimed.contains(&b) || !frames.usable[b] || !(row[b] > 0.0) {
                continue;
            }
            let Some(base) = neighborhood(&row, &frames.usable, b, reach) else {
                continue;
            };
            if 10.0 * (row[b] / base).log10() < snr_gate {
                continue;
            }
            line[i][h - 1] = row[b] - base;
            stripped.energies[[i, b]] = base;
            claimed.push(b);
        }
    }

    let (centers, width) = bin_centers(rpm_range.0, rpm_range.1, params.binning.bin_width_rpm);
    let mut orders = Vec::new();
    for h in 1..=n_orders {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for &c in &centers {
            let (mut num, mut den) = (0.0, 0.0);
            for &i in eligible {
                let w = (1.0 - (rpm[i] - c).abs() / width).max(0.0);
                num += w * line[i][h - 1];
                den += w;
            }
            if den > 0.0 && num > 0.0 {
                xs.push(c);
                ys.push(pa2_to_db(num / den));
            }
        }
        if xs.len() >= 2 {
            orders.push(HarmonicOrder {
                order: h,
                curve: Pchip::fit(&xs, &ys, false),
            });
        }
    }
    debug!(blades, max_order = n_orders, fitted = orders.len(), "harmonics extracted");

    let sigma_oct = hp
        .kernel_sigma_oct
        .unwrap_or(1.0 / (2.0 * layout.bands_per_octave as f64));
    Ok(HarmonicExtraction {
        model: HarmonicModel {
            blades,
            orders,
            sigma_oct,
        },
        stripped,
    })
}

impl HarmonicModel {
    /// Line energy per band at `rpm`, Pa²; zero where no line lands
    pub fn inject(&self, rpm: f64, centers: &[f64], usable: &[bool]) -> Vec<f64> {
        let mut out = vec![0.0; centers.len()];
        let lo = centers.iter().zip(usable).filter(|(_, &u)| u).map(|(c, _)| *c).reduce(f64::min);
        let hi = centers.iter().zip(usable).filter(|(_, &u)| u).map(|(c, _)| *c).reduce(f64::max);
        let (Some(lo), Some(hi)) = (lo, hi) else {
            return out;
        };

        for order in &self.orders {
            let f = line_hz(order.order, self.blades, rpm);
            let energy = db_to_pa2(order.curve.eval(rpm));
            if !(f > 0.0) || !energy.is_finite() {
                continue;
            }
            // lines more than half an octave past the outer centers fall out of range
            if f < lo / 2f64.sqrt() || f > hi * 2f64.sqrt() {
                continue;
            }

            let mut nearest: Vec<(usize, f64)> = (0..centers.len())
                .filter(|&b| usable[b])
                .map(|b| (b, (f / centers[b]).log2().abs()))
                .collect();
            nearest.sort_by(|a, b| a.1.total_cmp(&b.1));
            nearest.truncate(INJECTION_BANDS);

            let weights: Vec<f64> = nearest
                .iter()
                .map(|&(_, d)| (-0.5 * (d / self.sigma_oct).powi(2)).exp())
                .collect();
            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                for (&(b, _), w) in nearest.iter().zip(&weights) {
                    out[b] += energy * w / total;
                }
            } else if let Some(&(b, _)) = nearest.first() {
                out[b] += energy;
            }
        }
        out
    }
}
