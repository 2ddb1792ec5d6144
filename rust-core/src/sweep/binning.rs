//! RPM binning of sweep frames and per-band curve fitting

use crate::calibration::stats::{pa2_to_db, quantile, weighted_mean};
use crate::config::{BinningParams, CalibrationParams};
use crate::interp::Pchip;
use crate::spectrum::bands::BandLayout;
use crate::spectrum::framing::BandFrames;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fan-only band energy per RPM bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedSpectrum {
    pub bin_width: f64,
    pub centers: Vec<f64>,
    pub effective_frames: Vec<f64>,
    /// `[bin][band]`, Pa²
    pub band_energy: Vec<Vec<Option<f64>>>,
    pub widened: bool,
    /// Bin/band cells rejected by the SNR gate
    pub gated: usize,
}

impl BinnedSpectrum {
    pub fn n_bins(&self) -> usize {
        self.centers.len()
    }

    /// Bins that met the effective-frame minimum
    pub fn populated(&self, min_effective: f64) -> Vec<usize> {
        (0..self.n_bins()).filter(|&k| self.effective_frames[k] >= min_effective).collect()
    }
}

/// Bin centers spanning `[lo, hi]` with both ends as centers.
///
/// The requested width is adjusted so an integer number of bins fits.
pub fn bin_centers(lo: f64, hi: f64, width: f64) -> (Vec<f64>, f64) {
    let span = hi - lo;
    if !(span > 0.0) {
        return (vec![lo], width);
    }
    let n = (span / width).round().max(1.0) as usize;
    let step = span / n as f64;
    let mut centers: Vec<f64> = (0..n).map(|k| lo + k as f64 * step).collect();
    centers.push(hi);
    (centers, step)
}

/// Triangular weight of a frame at `rpm` for a bin at `center`
fn triangular(rpm: f64, center: f64, width: f64) -> f64 {
    (1.0 - (rpm - center).abs() / width).max(0.0)
}

/// Bin `frames` (absolute Pa²) by the per-frame RPM in `rpm`, restricted to `eligible` frames
pub fn bin_frames(
    frames: &BandFrames,
    rpm: &[f64],
    eligible: &[usize],
    env_baseline: &[Option<f64>],
    layout: &BandLayout,
    binning: &BinningParams,
    rpm_range: (f64, f64),
    width: f64,
) -> BinnedSpectrum {
    let (centers, width) = bin_centers(rpm_range.0, rpm_range.1, width);
    let totals = frames.totals();
    let n_bands = frames.n_bands();
    let mut gated = 0;
    let mut effective_frames = Vec::with_capacity(centers.len());
    let mut band_energy = Vec::with_capacity(centers.len());

    for &center in &centers {
        let members: Vec<(usize, f64)> = eligible
            .iter()
            .map(|&i| (i, triangular(rpm[i], center, width)))
            .filter(|&(_, w)| w > 0.0)
            .collect();
        let effective: f64 = members.iter().map(|&(_, w)| w).sum();
        effective_frames.push(effective);

        let member_totals: Vec<f64> = members.iter().map(|&(i, _)| totals[i]).collect();
        let cutoff = quantile(&member_totals, binning.keep_quantile).unwrap_or(f64::INFINITY);
        let kept: Vec<(usize, f64)> = members
            .into_iter()
            .filter(|&(i, _)| totals[i] <= cutoff)
            .collect();

        let row = (0..n_bands)
            .map(|b| {
                if !frames.usable[b] || kept.is_empty() {
                    return None;
                }
                let values: Vec<f64> = kept.iter().map(|&(i, _)| frames.energies[[i, b]]).collect();
                let weights: Vec<f64> = kept.iter().map(|&(_, w)| w).collect();
                let mean = weighted_mean(&values, &weights)?;
                let baseline = env_baseline.get(b).copied().flatten().unwrap_or(0.0);
                if baseline > 0.0 {
                    let threshold = if layout.bands[b].center < binning.low_freq_cutoff_hz {
                        binning.snr_min_db_low
                    } else {
                        binning.snr_min_db
                    };
                    if 10.0 * (mean / baseline).log10() < threshold {
                        gated += 1;
                        return None;
                    }
                }
                let fan = mean - baseline;
                (fan.is_finite() && fan > 0.0).then_some(fan)
            })
            .collect();
        band_energy.push(row);
    }

    BinnedSpectrum {
        bin_width: width,
        centers,
        effective_frames,
        band_energy,
        widened: false,
        gated,
    }
}

/// Bin a sweep, widening the bins once if any bin is under-populated.
/// Bins still below the minimum afterwards are emptied.
pub fn bin_sweep(
    frames: &BandFrames,
    rpm: &[f64],
    eligible: &[usize],
    env_baseline: &[Option<f64>],
    layout: &BandLayout,
    params: &CalibrationParams,
    rpm_range: (f64, f64),
) -> BinnedSpectrum {
    let binning = &params.binning;
    let bin = |width| {
        bin_frames(frames, rpm, eligible, env_baseline, layout, binning, rpm_range, width)
    };

    let mut binned = bin(binning.bin_width_rpm);
    let sparse = |b: &BinnedSpectrum| {
        b.effective_frames
            .iter()
            .any(|&e| e < binning.min_effective_frames)
    };
    if sparse(&binned) {
        let width = binning.bin_width_rpm * binning.widen_factor;
        info!(from = binning.bin_width_rpm, to = width, "widening sparse RPM bins");
        binned = bin(width);
        binned.widened = true;
    }

    for k in 0..binned.n_bins() {
        if binned.effective_frames[k] < binning.min_effective_frames {
            binned.band_energy[k].iter_mut().for_each(|e| *e = None);
        }
    }
    debug!(
        bins = binned.n_bins(),
        width = binned.bin_width,
        gated = binned.gated,
        "sweep binned"
    );
    binned
}

/// One band's RPM→dB curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandCurve {
    pub center_hz: f64,
    pub nominal_hz: f64,
    /// `None` when the band is unusable or has no surviving bins
    pub curve: Option<Pchip>,
    /// Points borrowed from neighboring bands by low-frequency smoothing
    pub borrowed: usize,
}

fn band_points(binned: &BinnedSpectrum, band: usize) -> Vec<(f64, f64)> {
    binned
        .centers
        .iter()
        .zip(&binned.band_energy)
        .filter_map(|(&c, row)| row[band].map(|e| (c, pa2_to_db(e))))
        .collect()
}

/// Level offset `band − neighbor` over shared bin centers
fn neighbor_offset(own: &[(f64, f64)], other: &[(f64, f64)]) -> f64 {
    let shared: Vec<f64> = own
        .iter()
        .filter_map(|&(x, y)| other.iter().find(|p| p.0 == x).map(|p| y - p.1))
        .collect();
    if let Some(m) = crate::calibration::stats::median(&shared) {
        return m;
    }
    let mean = |pts: &[(f64, f64)]| pts.iter().map(|p| p.1).sum::<f64>() / pts.len() as f64;
    if own.is_empty() || other.is_empty() {
        0.0
    } else {
        mean(own) - mean(other)
    }
}

/// Fit per-band PCHIP curves over bin centers, with optional low-frequency
/// cross-band smoothing.
pub fn fit_band_curves(
    binned: &BinnedSpectrum,
    layout: &BandLayout,
    binning: &BinningParams,
) -> Vec<BandCurve> {
    let n_bands = layout.len();
    let points: Vec<Vec<(f64, f64)>> = (0..n_bands).map(|b| band_points(binned, b)).collect();

    (0..n_bands)
        .map(|b| {
            let band = &layout.bands[b];
            let mut pts = points[b].clone();
            let mut borrowed = 0;

            let sparse_lf = binning.lf_smoothing
                && band.usable
                && band.center < binning.low_freq_cutoff_hz;
            if sparse_lf && pts.len() < binning.lf_min_points {
                // nearest neighbors first, lower before upper
                'spread: for distance in 1..n_bands {
                    for nb in [b.checked_sub(distance), Some(b + distance)].into_iter().flatten() {
                        if nb >= n_bands || !layout.bands[nb].usable || points[nb].is_empty() {
                            continue;
                        }
                        let offset = neighbor_offset(&points[b], &points[nb]);
                        for &(x, y) in &points[nb] {
                            if pts.iter().any(|p| p.0 == x) {
                                continue;
                            }
                            pts.push((x, y + offset));
                            borrowed += 1;
                        }
                        if pts.len() >= binning.lf_min_points {
                            break 'spread;
                        }
                    }
                }
            }

            let curve = (band.usable && !pts.is_empty()).then(|| {
                let (xs, ys): (Vec<f64>, Vec<f64>) = pts.into_iter().unzip();
                Pchip::fit(&xs, &ys, false)
            });
            BandCurve {
                center_hz: band.center,
                nominal_hz: band.nominal,
                curve,
                borrowed,
            }
        })
        .collect()
}
