//! Closure bake
//!
//! Folds a band-only level correction into every band curve so that bands
//! plus injected harmonics reproduce the calibrated fan LAeq at each bin center.

use super::harmonics::HarmonicModel;
use crate::calibration::stats::{db_to_pa2, pa2_to_db};
use crate::error::{CalibError, Result};
use crate::interp::Pchip;
use crate::sweep::binning::BandCurve;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureCorrection {
    pub bin_centers: Vec<f64>,
    /// Target − synthesized LAeq before the bake, dB
    pub delta_db: Vec<f64>,
    /// Band-only correction applied to every band curve, dB
    pub correction: Pchip,
    /// Bins where harmonics alone already reached the target
    pub skipped_bins: usize,
}

/// Synthesized total energy split into (band curves, harmonics) at `rpm`
pub fn synthesize(
    curves: &[BandCurve],
    harmonics: Option<&HarmonicModel>,
    rpm: f64,
    centers: &[f64],
    usable: &[bool],
) -> (f64, f64) {
    let bands: f64 = curves
        .iter()
        .filter_map(|c| c.curve.as_ref())
        .map(|curve| db_to_pa2(curve.eval(rpm)))
        .filter(|e| e.is_finite())
        .sum();
    let lines: f64 = harmonics.map_or(0.0, |h| h.inject(rpm, centers, usable).iter().sum());
    (bands, lines)
}

/// Bake the correction into `curves`.
///
/// `target` gives the calibrated fan-only LAeq at an RPM. On error the curves
/// are left untouched.
pub fn bake(
    curves: &mut [BandCurve],
    harmonics: Option<&HarmonicModel>,
    bin_centers: &[f64],
    target: impl Fn(f64) -> f64,
) -> Result<ClosureCorrection> {
    let centers: Vec<f64> = curves.iter().map(|c| c.center_hz).collect();
    let usable: Vec<bool> = curves.iter().map(|c| c.curve.is_some()).collect();

    let mut xs = Vec::with_capacity(bin_centers.len());
    let mut corr = Vec::with_capacity(bin_centers.len());
    let mut delta_db = Vec::with_capacity(bin_centers.len());
    let mut skipped_bins = 0;
    for &x in bin_centers {
        let (bands, lines) = synthesize(curves, harmonics, x, &centers, &usable);
        let goal = db_to_pa2(target(x));
        delta_db.push(pa2_to_db(goal) - pa2_to_db(bands + lines));

        let residual = goal - lines;
        if bands > 0.0 && residual > 0.0 && residual.is_finite() {
            xs.push(x);
            corr.push(10.0 * (residual / bands).log10());
        } else {
            skipped_bins += 1;
        }
    }
    if xs.is_empty() {
        return Err(CalibError::Numeric("closure: no bin with band energy below target".into()));
    }
    let correction = Pchip::fit(&xs, &corr, false);

    let shifted: Vec<Option<Pchip>> = curves
        .iter()
        .map(|c| {
            c.curve.as_ref().map(|curve| {
                let ys: Vec<f64> = bin_centers
                    .iter()
                    .map(|&x| curve.eval(x) + correction.eval(x))
                    .collect();
                Pchip::fit(bin_centers, &ys, false)
            })
        })
        .collect();
    for (c, new) in curves.iter_mut().zip(shifted) {
        c.curve = new;
    }

    debug!(bins = bin_centers.len(), skipped_bins, "closure baked");
    Ok(ClosureCorrection {
        bin_centers: bin_centers.to_vec(),
        delta_db,
        correction,
        skipped_bins,
    })
}
