//! Spectral model building: sweep → harmonics → band curves → closure

pub mod harmonics;
pub mod closure;
pub mod spectral_model;

pub use closure::ClosureCorrection;
pub use harmonics::HarmonicModel;
pub use spectral_model::{
    ModelDocument, Prediction, Provenance, SpectralModel, SweepDiagnostics, CODE_VERSION,
};

use crate::audio::batch::AudioBatch;
use crate::calibration::Calibration;
use crate::config::CalibrationParams;
use crate::error::Result;
use crate::filters::cache::FilterBankCache;
use crate::spectrum::analysis::RecordingAnalyzer;
use crate::sweep::{analyse_sweep, bin_sweep, fit_band_curves};
use tracing::{info, warn};

/// Build the spectral model of a batch from its calibration and sweep
pub fn build_model(
    batch: &AudioBatch,
    calibration: &Calibration,
    params: &CalibrationParams,
    filters: &FilterBankCache,
) -> Result<SpectralModel> {
    let sweep_folder = batch.require_sweep()?;
    let analyzer = RecordingAnalyzer::new(params, filters);
    let layout = analyzer.layout();

    let sweep = analyse_sweep(sweep_folder, calibration, &analyzer)?;
    let eligible = sweep.track.binnable(params.sweep.exclude_unstable);
    let rpm_range = (calibration.rpm_min(), calibration.rpm_max());

    let (harmonics, frames) = match (params.harmonics.enabled, params.harmonics.blades) {
        (true, Some(_)) => {
            let extracted = harmonics::extract(
                &sweep.frames,
                &sweep.track.rpm,
                &eligible,
                layout,
                rpm_range,
                params,
            );
            match extracted {
                Ok(extraction) => (Some(extraction.model), extraction.stripped),
                Err(e) => {
                    warn!(error = %e, "harmonic extraction failed, continuing without harmonics");
                    (None, sweep.frames.clone())
                }
            }
        }
        (true, None) => {
            warn!("harmonics enabled without a blade count, skipping");
            (None, sweep.frames.clone())
        }
        _ => (None, sweep.frames.clone()),
    };

    let binned = bin_sweep(
        &frames,
        &sweep.track.rpm,
        &eligible,
        &calibration.env_baseline,
        layout,
        params,
        rpm_range,
    );
    let mut bands = fit_band_curves(&binned, layout, &params.binning);

    let closure = if params.harmonics.closure {
        let target = |rpm: f64| calibration.target_laeq(rpm);
        match closure::bake(&mut bands, harmonics.as_ref(), &binned.centers, target) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "closure bake failed, model left uncorrected");
                None
            }
        }
    } else {
        None
    };

    let diagnostics = SweepDiagnostics {
        mode: sweep.track.mode,
        frames: sweep.track.len(),
        unstable_frames: sweep.track.unstable_count(),
        binned_frames: eligible.len(),
        head_offset_db: sweep.track.head_offset_db,
        tail_offset_db: sweep.track.tail_offset_db,
        widened: binned.widened,
        gated_cells: binned.gated,
        own_reference: sweep.own_reference,
    };
    info!(
        bins = binned.n_bins(),
        modeled_bands = bands.iter().filter(|b| b.curve.is_some()).count(),
        harmonics = harmonics.as_ref().map_or(0, |h| h.orders.len()),
        closure = closure.is_some(),
        "spectral model built"
    );

    Ok(SpectralModel {
        sample_rate: params.audio.sample_rate,
        grid: layout.grid,
        bands_per_octave: layout.bands_per_octave,
        rpm_min: rpm_range.0,
        rpm_max: rpm_range.1,
        bin_width: binned.bin_width,
        bin_centers: binned.centers,
        bands,
        harmonics,
        closure,
        diagnostics,
    })
}
