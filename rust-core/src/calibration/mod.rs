//! Environment and anchor calibration
//!
//! Turns the short recordings of a batch (`env/` plus one folder per RPM) into
//! absolute levels: a scale factor per recording, a per-band environment
//! baseline, per-RPM anchor spectra and RPM→LAeq curves.

pub mod stats;

use crate::audio::batch::AudioBatch;
use crate::audio::reference::read_reference;
use crate::config::{CalibrationParams, PA0};
use crate::error::{CalibError, Result};
use crate::filters::cache::FilterBankCache;
use crate::interp::Pchip;
use crate::model::Provenance;
use crate::spectrum::analysis::{AnalysisWindow, RecordingAnalyzer};
use crate::spectrum::framing::BandFrames;
use serde::{Deserialize, Serialize};
use stats::{aggregate, db_subtract, mad_clip, pa2_to_db, percentile, quantile};
use tracing::{debug, info};

/// One RPM node: its absolute, environment-subtracted band spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSpectrum {
    pub rpm: f64,
    /// Pa² per band; `None` where the band is unusable or not above the environment
    pub band_energy: Vec<Option<f64>>,
    pub band_db: Vec<Option<f64>>,
    pub laeq_raw: f64,
    pub laeq_sub: f64,
    /// Squared scale factor applied to this recording
    pub scale: f64,
    pub own_reference: bool,
    pub null_bands: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub sample_rate: u32,
    pub band_centers: Vec<f64>,
    pub nominal_centers: Vec<f64>,
    pub usable: Vec<bool>,
    /// Environment LAeq as read from its meter reference
    pub env_laeq: f64,
    /// Squared environment scale factor s²
    pub env_scale: f64,
    /// Robust per-band environment energy, Pa²
    pub env_baseline: Vec<Option<f64>>,
    pub rpm_nodes: Vec<f64>,
    pub laeq_raw: Vec<f64>,
    pub laeq_sub: Vec<f64>,
    pub curve_raw: Pchip,
    pub curve_sub: Pchip,
    pub anchors: Vec<AnchorSpectrum>,
    /// Null bands summed over all anchors
    pub null_bands: usize,
}

impl Calibration {
    pub fn rpm_min(&self) -> f64 {
        self.rpm_nodes.first().copied().unwrap_or(f64::NAN)
    }

    pub fn rpm_max(&self) -> f64 {
        self.rpm_nodes.last().copied().unwrap_or(f64::NAN)
    }

    /// Fan-only LAeq at `rpm` (environment removed)
    pub fn target_laeq(&self, rpm: f64) -> f64 {
        self.curve_sub.eval(rpm)
    }

    /// What a meter would read at `rpm`: fan plus environment
    pub fn expected_total_laeq(&self, rpm: f64) -> f64 {
        stats::db_add(self.curve_sub.eval(rpm), self.env_laeq)
    }

    /// Per-RPM noise for job summaries
    pub fn per_rpm_noise(&self) -> Vec<(f64, f64)> {
        self.rpm_nodes.iter().copied().zip(self.laeq_sub.iter().copied()).collect()
    }
}

/// Cached calibration artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDocument {
    pub provenance: Provenance,
    pub calibration: Calibration,
}

/// s² such that `s²·E = Pa0²·10^(L/10)`
pub fn scale_factor(whole_file_energy: f64, reference_laeq: f64) -> Result<f64> {
    if !(whole_file_energy.is_finite() && whole_file_energy > 0.0) {
        return Err(CalibError::Numeric(format!(
            "cannot scale to reference: whole-file energy {whole_file_energy}"
        )));
    }
    Ok(PA0 * PA0 * 10f64.powf(reference_laeq / 10.0) / whole_file_energy)
}

/// Per-band samples that survive the quiet-frame cut and MAD clipping
pub fn robust_band_values(frames: &BandFrames, params: &CalibrationParams) -> Vec<Vec<f64>> {
    let robust = &params.robust;
    let totals = frames.totals();
    let cutoff = quantile(&totals, robust.frame_keep_quantile).unwrap_or(f64::INFINITY);
    let kept: Vec<usize> = (0..frames.n_frames()).filter(|&i| totals[i] <= cutoff).collect();

    (0..frames.n_bands())
        .map(|b| {
            if !frames.usable[b] {
                return Vec::new();
            }
            let values: Vec<f64> = kept
                .iter()
                .map(|&i| frames.energies[[i, b]])
                .filter(|e| e.is_finite() && *e >= 0.0)
                .collect();
            match robust.mad_tau {
                Some(tau) => mad_clip(&values, tau),
                None => values,
            }
        })
        .collect()
}

/// Stack the frames of several recordings of the same layout
fn concat_frames(all: &[BandFrames]) -> Option<BandFrames> {
    let first = all.first()?;
    let views: Vec<_> = all.iter().map(|f| f.energies.view()).collect();
    let energies = ndarray::concatenate(ndarray::Axis(0), &views).ok()?;
    let usable = (0..first.n_bands())
        .map(|b| all.iter().all(|f| f.usable[b]))
        .collect();
    Some(BandFrames {
        energies,
        usable,
        times: all.iter().flat_map(|f| f.times.iter().copied()).collect(),
        hop_sec: first.hop_sec,
        duration_sec: all.iter().map(|f| f.duration_sec).sum(),
    })
}

/// Run the calibration stage for a scanned batch
pub fn calibrate(
    batch: &AudioBatch,
    params: &CalibrationParams,
    filters: &FilterBankCache,
) -> Result<Calibration> {
    // References are read up front so structural failures precede any DSP
    let env_laeq = read_reference(&batch.env.reference)?;
    let rpm_refs = batch
        .rpms
        .iter()
        .map(|node| node.reference.as_deref().map(read_reference).transpose())
        .collect::<Result<Vec<_>>>()?;

    let analyzer = RecordingAnalyzer::new(params, filters);
    let layout = analyzer.layout();

    let env_recordings = batch
        .env
        .audio
        .iter()
        .map(|path| analyzer.analyse_file(path, AnalysisWindow::Short))
        .collect::<Result<Vec<_>>>()?;
    let env_energy = env_recordings.iter().map(|r| r.reference_energy).sum::<f64>()
        / env_recordings.len() as f64;
    let env_frames: Vec<BandFrames> = env_recordings.into_iter().map(|r| r.frames).collect();
    let env_scale = scale_factor(env_energy, env_laeq)?;
    let env_stack = concat_frames(&env_frames).ok_or(CalibError::EmptyAudio)?;

    let env_baseline: Vec<Option<f64>> = robust_band_values(&env_stack, params)
        .iter()
        .map(|values| {
            percentile(values, params.robust.env_percentile).map(|e| (e * env_scale).max(0.0))
        })
        .collect();
    debug!(env_laeq, env_scale, files = env_frames.len(), "environment scaled");

    let mut anchors = Vec::with_capacity(batch.rpms.len());
    for (node, own_ref) in batch.rpms.iter().zip(rpm_refs) {
        let analysed = analyzer.analyse_file(&node.audio, AnalysisWindow::Short)?;
        let (frames, whole) = (analysed.frames, analysed.reference_energy);
        let scale = match own_ref {
            Some(laeq) => scale_factor(whole, laeq)?,
            None => env_scale,
        };
        let laeq_raw = own_ref.unwrap_or_else(|| pa2_to_db(whole * scale));
        let laeq_sub = db_subtract(laeq_raw, env_laeq, params.robust.sub_floor_db);

        let mut null_bands = 0;
        let band_energy: Vec<Option<f64>> = robust_band_values(&frames, params)
            .iter()
            .zip(&env_baseline)
            .enumerate()
            .map(|(b, (values, baseline))| {
                if !layout.bands[b].usable {
                    return None;
                }
                let value = aggregate(values, &params.robust)
                    .map(|e| e * scale - baseline.unwrap_or(0.0))
                    .filter(|e| e.is_finite() && *e > 0.0);
                if value.is_none() {
                    null_bands += 1;
                }
                value
            })
            .collect();

        debug!(rpm = node.rpm, laeq_raw, laeq_sub, null_bands, "anchor spectrum");
        anchors.push(AnchorSpectrum {
            rpm: node.rpm,
            band_db: band_energy.iter().map(|e| e.map(pa2_to_db)).collect(),
            band_energy,
            laeq_raw,
            laeq_sub,
            scale,
            own_reference: own_ref.is_some(),
            null_bands,
        });
    }

    let rpm_nodes: Vec<f64> = anchors.iter().map(|a| a.rpm).collect();
    let laeq_raw: Vec<f64> = anchors.iter().map(|a| a.laeq_raw).collect();
    let laeq_sub: Vec<f64> = anchors.iter().map(|a| a.laeq_sub).collect();
    let monotone = params.robust.monotone_curve;
    let null_bands = anchors.iter().map(|a| a.null_bands).sum();

    info!(
        nodes = rpm_nodes.len(),
        env_laeq,
        null_bands,
        "calibration complete"
    );

    Ok(Calibration {
        sample_rate: params.audio.sample_rate,
        band_centers: layout.centers(),
        nominal_centers: layout.nominal_centers(),
        usable: layout.usable(),
        env_laeq,
        env_scale,
        env_baseline,
        curve_raw: Pchip::fit(&rpm_nodes, &laeq_raw, monotone),
        curve_sub: Pchip::fit(&rpm_nodes, &laeq_sub, monotone),
        rpm_nodes,
        laeq_raw,
        laeq_sub,
        anchors,
        null_bands,
    })
}
