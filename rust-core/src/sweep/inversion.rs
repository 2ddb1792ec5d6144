//! RPM-track inversion
//!
//! A sweep recording carries no tachometer signal, so the RPM of each frame is
//! recovered by matching its absolute LAeq against the calibrated RPM→LAeq
//! curve. The hybrid mode adds a blade-passing-frequency presence term.

use crate::calibration::stats::{median, pa2_to_db};
use crate::calibration::Calibration;
use crate::config::{CalibrationParams, InversionMode, SweepParams};
use crate::error::{CalibError, Result};
use crate::spectrum::bands::BandLayout;
use crate::spectrum::framing::BandFrames;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Frame-level RPM trajectory of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpmTrack {
    pub mode: InversionMode,
    pub times: Vec<f64>,
    /// Measured absolute LAeq per frame
    pub laeq: Vec<f64>,
    /// Grid-search result before smoothing
    pub raw_rpm: Vec<f64>,
    /// Median-filtered, rate-limited track
    pub rpm: Vec<f64>,
    pub locked: Vec<bool>,
    pub unstable: Vec<bool>,
    /// Mean measured − expected LAeq over the head lock, dB
    pub head_offset_db: Option<f64>,
    pub tail_offset_db: Option<f64>,
}

impl RpmTrack {
    pub fn len(&self) -> usize {
        self.rpm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rpm.is_empty()
    }

    /// Frame indices eligible for binning
    pub fn binnable(&self, exclude_unstable: bool) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| {
                self.rpm[i].is_finite()
                    && self.raw_rpm[i].is_finite()
                    && !(exclude_unstable && self.unstable[i])
            })
            .collect()
    }

    pub fn unstable_count(&self) -> usize {
        self.unstable.iter().filter(|&&u| u).count()
    }
}

/// Linear 0→1 ramp between `lo` and `hi`
fn ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// RPM candidates from `lo` to `hi` inclusive
pub fn rpm_grid(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let n = ((hi - lo) / step).floor().max(0.0) as usize;
    let mut grid: Vec<f64> = (0..=n).map(|i| lo + i as f64 * step).collect();
    if grid.last().is_some_and(|&last| hi - last > step * 1e-6) {
        grid.push(hi);
    }
    grid
}

/// Per-band line-to-neighborhood SNR in dB for one frame
pub(crate) fn band_snr_db(row: &[f64], usable: &[bool], neighbors: usize) -> Vec<Option<f64>> {
    (0..row.len())
        .map(|b| {
            if !usable[b] || !(row[b] > 0.0) {
                return None;
            }
            let lo = b.saturating_sub(neighbors);
            let hi = (b + neighbors).min(row.len() - 1);
            let around: Vec<f64> = (lo..=hi)
                .filter(|&k| k != b && usable[k] && row[k] > 0.0)
                .map(|k| row[k])
                .collect();
            let baseline = median(&around)?;
            Some(10.0 * (row[b] / baseline).log10())
        })
        .collect()
}

/// Band index of each harmonic order for every candidate RPM
struct HarmonicLookup {
    bands: Vec<Vec<Option<usize>>>,
    order_weights: Vec<f64>,
}

impl HarmonicLookup {
    fn new(grid: &[f64], blades: u32, layout: &BandLayout, sweep: &SweepParams) -> Self {
        let orders = sweep.hybrid_orders.max(1);
        let bands = grid
            .iter()
            .map(|&rpm| {
                (1..=orders)
                    .map(|h| layout.band_containing(h as f64 * blades as f64 * rpm / 60.0))
                    .collect()
            })
            .collect();
        let order_weights = (0..orders)
            .map(|k| 10f64.powf(-sweep.harmonic_decay_db * k as f64 / 10.0))
            .collect();
        Self { bands, order_weights }
    }

    /// (weighted SNR in dB, absence penalty in [0, 1]) for candidate `j`
    fn score(&self, j: usize, snr: &[Option<f64>], sweep: &SweepParams) -> (f64, f64) {
        let (mut w_sum, mut snr_sum, mut presence) = (0.0, 0.0, 0.0);
        for (band, w) in self.bands[j].iter().zip(&self.order_weights) {
            let s = band.and_then(|b| snr[b]).unwrap_or(0.0).max(0.0);
            w_sum += w;
            snr_sum += w * s;
            presence += w * ramp(s, sweep.snr_lo_db, sweep.snr_hi_db);
        }
        if w_sum <= 0.0 {
            return (0.0, 1.0);
        }
        (snr_sum / w_sum, 1.0 - presence / w_sum)
    }
}

/// Index of the minimum cost; the first candidate wins ties
fn argmin(costs: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (j, c) in costs.enumerate() {
        if c.is_finite() && best.map_or(true, |(_, b)| c < b) {
            best = Some((j, c));
        }
    }
    best.map(|(j, _)| j)
}

/// Centered running median with the window shrunk at the edges
pub fn median_filter(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let reach = half.min(i).min(values.len() - 1 - i);
            median(&values[i - reach..=i + reach]).unwrap_or(values[i])
        })
        .collect()
}

/// Clamp successive differences to `max_step`.
///
/// Non-finite entries take the last finite value; a leading gap takes the
/// first finite one. An all-gap input is returned unchanged.
pub fn rate_limit(values: &[f64], max_step: f64) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match (prev, v.is_finite()) {
            (Some(p), true) => v.clamp(p - max_step, p + max_step),
            (Some(p), false) => p,
            (None, _) => v,
        };
        if next.is_finite() {
            prev = Some(next);
        }
        out.push(next);
    }
    if let Some(first) = out.iter().copied().find(|v| v.is_finite()) {
        for v in out.iter_mut().take_while(|v| !v.is_finite()) {
            *v = first;
        }
    }
    out
}

/// Recover the RPM trajectory of a sweep.
///
/// `frames` must already be in absolute units (Pa²).
pub fn invert(
    frames: &BandFrames,
    layout: &BandLayout,
    calibration: &Calibration,
    params: &CalibrationParams,
) -> Result<RpmTrack> {
    let n = frames.n_frames();
    if n < 2 {
        return Err(CalibError::SweepTooShort(n));
    }
    let sweep = &params.sweep;
    let (rpm_min, rpm_max) = (calibration.rpm_min(), calibration.rpm_max());

    let grid = rpm_grid(rpm_min, rpm_max, sweep.rpm_grid_step);
    let predicted: Vec<f64> = grid.iter().map(|&r| calibration.expected_total_laeq(r)).collect();
    let laeq: Vec<f64> = frames.totals().into_iter().map(pa2_to_db).collect();

    let mode = match (sweep.mode, params.harmonics.blades) {
        (InversionMode::Hybrid, None) => {
            warn!("hybrid inversion needs a blade count, falling back to LA-only");
            InversionMode::LaOnly
        }
        (mode, _) => mode,
    };
    let lookup = match (mode, params.harmonics.blades) {
        (InversionMode::Hybrid, Some(blades)) => {
            Some(HarmonicLookup::new(&grid, blades, layout, sweep))
        }
        _ => None,
    };

    let head_end = sweep.head_lock_sec;
    let tail_start = frames.duration_sec - sweep.tail_lock_sec;

    let mut raw_rpm = Vec::with_capacity(n);
    let mut locked = Vec::with_capacity(n);
    for i in 0..n {
        let t = frames.times[i];
        if t < head_end {
            raw_rpm.push(rpm_min);
            locked.push(true);
            continue;
        }
        if t > tail_start {
            raw_rpm.push(rpm_max);
            locked.push(true);
            continue;
        }
        locked.push(false);

        let measured = laeq[i];
        let la_cost = predicted.iter().map(|p| (measured - p).abs());
        let pick = match &lookup {
            None => argmin(la_cost),
            Some(lookup) => {
                let row: Vec<f64> = frames.row(i).to_vec();
                let neighbors = params.harmonics.neighbor_bands.max(1);
                let snr = band_snr_db(&row, &frames.usable, neighbors);
                let scores: Vec<(f64, f64)> =
                    (0..grid.len()).map(|j| lookup.score(j, &snr, sweep)).collect();
                let best_snr = scores.iter().map(|s| s.0).fold(0.0, f64::max);
                let w_h = sweep.w_h_max * ramp(best_snr, sweep.snr_lo_db, sweep.snr_hi_db);
                argmin(
                    la_cost
                        .zip(&scores)
                        .map(|(la, (_, penalty))| sweep.w_la * la + w_h * penalty),
                )
            }
        };
        raw_rpm.push(pick.map_or(f64::NAN, |j| grid[j]));
    }

    let hop = frames.hop_sec;
    let filtered = median_filter(&raw_rpm, sweep.median_window.max(1));
    let mut rpm = rate_limit(&filtered, sweep.max_rpm_rate * hop);
    for i in 0..n {
        if locked[i] {
            rpm[i] = raw_rpm[i];
        }
    }

    let unstable: Vec<bool> = (0..n)
        .map(|i| {
            if locked[i] {
                return false;
            }
            // no candidate matched a silent or corrupt frame
            if !raw_rpm[i].is_finite() {
                return true;
            }
            if i == 0 {
                return false;
            }
            let rpm_rate = (raw_rpm[i] - raw_rpm[i - 1]).abs() / hop;
            let la_rate = (laeq[i] - laeq[i - 1]).abs() / hop;
            rpm_rate > sweep.unstable_rpm_rate || la_rate > sweep.unstable_la_rate
        })
        .collect();

    let offset = |pred: &dyn Fn(usize) -> bool, rpm: f64| {
        let measured: Vec<f64> = (0..n).filter(|&i| pred(i)).map(|i| laeq[i]).collect();
        (!measured.is_empty()).then(|| {
            let mean = measured.iter().sum::<f64>() / measured.len() as f64;
            mean - calibration.expected_total_laeq(rpm)
        })
    };
    let head_offset_db = offset(&|i: usize| locked[i] && frames.times[i] < head_end, rpm_min);
    let tail_offset_db = offset(&|i: usize| locked[i] && frames.times[i] > tail_start, rpm_max);

    let track = RpmTrack {
        mode,
        times: frames.times.clone(),
        laeq,
        raw_rpm,
        rpm,
        locked,
        unstable,
        head_offset_db,
        tail_offset_db,
    };
    debug!(
        frames = n,
        unstable = track.unstable_count(),
        head_offset_db = ?track.head_offset_db,
        tail_offset_db = ?track.tail_offset_db,
        "rpm track inverted"
    );
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::stats::db_to_pa2;
    use crate::config::BandParams;
    use crate::interp::Pchip;
    use ndarray::Array2;

    fn calibration() -> Calibration {
        let nodes = vec![1000.0, 2000.0];
        let sub = vec![50.0, 60.0];
        Calibration {
            sample_rate: 16_000,
            band_centers: vec![],
            nominal_centers: vec![],
            usable: vec![],
            env_laeq: 30.0,
            env_scale: 1.0,
            env_baseline: vec![],
            curve_raw: Pchip::fit(&nodes, &sub, true),
            curve_sub: Pchip::fit(&nodes, &sub, true),
            rpm_nodes: nodes,
            laeq_raw: sub.clone(),
            laeq_sub: sub,
            anchors: vec![],
            null_bands: 0,
        }
    }

    /// One-band frames whose LAeq follows the calibration curve at `rpms`
    fn frames_for(rpms: &[f64], cal: &Calibration, hop: f64) -> BandFrames {
        let energies: Vec<f64> = rpms
            .iter()
            .map(|&r| db_to_pa2(cal.expected_total_laeq(r)))
            .collect();
        BandFrames {
            energies: Array2::from_shape_vec((rpms.len(), 1), energies).unwrap(),
            usable: vec![true],
            times: (0..rpms.len()).map(|i| (i as f64 + 0.5) * hop).collect(),
            hop_sec: hop,
            duration_sec: rpms.len() as f64 * hop,
        }
    }

    fn layout() -> BandLayout {
        BandLayout::new(&BandParams::default(), 16_000)
    }

    #[test]
    fn la_only_recovers_linear_sweep() {
        let cal = calibration();
        let rpms: Vec<f64> = (0..40).map(|i| 1000.0 + 25.0 * i as f64).collect();
        let frames = frames_for(&rpms, &cal, 0.25);
        let mut params = CalibrationParams::default();
        params.sweep.head_lock_sec = 0.0;
        params.sweep.tail_lock_sec = 0.0;

        let track = invert(&frames, &layout(), &cal, &params).unwrap();
        for (got, want) in track.raw_rpm.iter().zip(&rpms) {
            assert!((got - want).abs() <= 1.0, "{got} vs {want}");
        }
        assert_eq!(track.unstable_count(), 0);
    }

    #[test]
    fn head_and_tail_are_locked() {
        let cal = calibration();
        let rpms = vec![1500.0; 20];
        let frames = frames_for(&rpms, &cal, 0.25);
        let track = invert(&frames, &layout(), &cal, &CalibrationParams::default()).unwrap();
        assert_eq!(track.rpm[0], 1000.0);
        assert_eq!(track.rpm[19], 2000.0);
        assert!(track.locked[0] && track.locked[19] && !track.locked[10]);
        assert!(track.head_offset_db.unwrap() > 0.0);
        assert!(track.tail_offset_db.unwrap() < 0.0);
    }

    #[test]
    fn single_frame_is_too_short() {
        let cal = calibration();
        let frames = frames_for(&[1500.0], &cal, 0.25);
        let err = invert(&frames, &layout(), &cal, &CalibrationParams::default()).unwrap_err();
        assert!(matches!(err, CalibError::SweepTooShort(1)));
    }

    #[test]
    fn ties_pick_the_lowest_rpm() {
        assert_eq!(argmin([3.0, 1.0, 1.0, 2.0].into_iter()), Some(1));
        assert_eq!(argmin([f64::NAN, 2.0].into_iter()), Some(1));
    }

    #[test]
    fn median_then_rate_limit() {
        let spiky = [0.0, 0.0, 100.0, 0.0, 0.0];
        assert_eq!(median_filter(&spiky, 3), vec![0.0; 5]);
        assert_eq!(rate_limit(&[0.0, 10.0, 10.0, -10.0], 4.0), vec![0.0, 4.0, 8.0, 4.0]);
    }

    #[test]
    fn rate_limit_bridges_gaps() {
        let nan = f64::NAN;
        assert_eq!(
            rate_limit(&[nan, 10.0, nan, nan, 20.0], 4.0),
            vec![10.0, 10.0, 10.0, 10.0, 14.0]
        );
        assert!(rate_limit(&[nan, nan], 4.0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn silent_stretch_is_flagged_not_fatal() {
        let cal = calibration();
        let rpms: Vec<f64> = (0..40).map(|i| 1000.0 + 25.0 * i as f64).collect();
        let mut frames = frames_for(&rpms, &cal, 0.25);
        for i in 15..22 {
            frames.energies[[i, 0]] = 0.0;
        }

        let track = invert(&frames, &layout(), &cal, &CalibrationParams::default()).unwrap();
        assert!(track.rpm.iter().all(|r| r.is_finite()));
        for i in 15..22 {
            assert!(track.raw_rpm[i].is_nan());
            assert!(track.unstable[i]);
        }
        let eligible = track.binnable(false);
        assert!((15..22).all(|i| !eligible.contains(&i)));
        assert!(eligible.contains(&10) && eligible.contains(&30));
    }

    #[test]
    fn hybrid_follows_the_blade_line_when_loudness_is_flat() {
        let mut cal = calibration();
        let flat = vec![55.0, 55.0];
        cal.curve_sub = Pchip::fit(&cal.rpm_nodes, &flat, true);
        cal.curve_raw = Pchip::fit(&cal.rpm_nodes, &flat, true);

        let layout = layout();
        let (blades, truth) = (6, 1500.0);
        let lit: Vec<usize> = (1..=4)
            .filter_map(|h| layout.band_containing(h as f64 * blades as f64 * truth / 60.0))
            .collect();
        let n = 12;
        let mut energies = Array2::from_elem((n, layout.len()), 1e-4);
        for i in 0..n {
            for &b in &lit {
                energies[[i, b]] = 1e-2;
            }
        }
        let frames = BandFrames {
            energies,
            usable: layout.usable(),
            times: (0..n).map(|i| (i as f64 + 0.5) * 0.25).collect(),
            hop_sec: 0.25,
            duration_sec: n as f64 * 0.25,
        };

        let mut params = CalibrationParams::default();
        params.sweep.head_lock_sec = 0.0;
        params.sweep.tail_lock_sec = 0.0;
        let la_only = invert(&frames, &layout, &cal, &params).unwrap();
        assert_eq!(la_only.mode, InversionMode::LaOnly);
        assert!(la_only.raw_rpm.iter().all(|&r| r == 1000.0));

        params.sweep.mode = InversionMode::Hybrid;
        params.harmonics.blades = Some(blades);
        let hybrid = invert(&frames, &layout, &cal, &params).unwrap();
        assert_eq!(hybrid.mode, InversionMode::Hybrid);
        let bpf_band = layout.band_containing(blades as f64 * truth / 60.0);
        for &rpm in &hybrid.raw_rpm {
            assert!(rpm > 1400.0 && rpm < 1800.0, "{rpm}");
            assert_eq!(layout.band_containing(blades as f64 * rpm / 60.0), bpf_band);
        }
        assert_eq!(hybrid.unstable_count(), 0);
    }

    #[test]
    fn hybrid_without_blades_falls_back() {
        let cal = calibration();
        let frames = frames_for(&[1500.0; 8], &cal, 0.25);
        let mut params = CalibrationParams::default();
        params.sweep.mode = InversionMode::Hybrid;
        let track = invert(&frames, &layout(), &cal, &params).unwrap();
        assert_eq!(track.mode, InversionMode::LaOnly);
    }

    #[test]
    fn grid_includes_both_ends() {
        let g = rpm_grid(1000.0, 1010.5, 5.0);
        assert_eq!(g, vec![1000.0, 1005.0, 1010.0, 1010.5]);
        assert_eq!(rpm_grid(1000.0, 1000.0, 1.0), vec![1000.0]);
    }

    #[test]
    fn snr_against_neighbors() {
        let row = [1.0, 1.0, 10.0, 1.0, 1.0];
        let snr = band_snr_db(&row, &[true; 5], 2);
        assert!((snr[2].unwrap() - 10.0).abs() < 1e-12);
        assert!(snr[0].unwrap() < 0.0);
    }
}
