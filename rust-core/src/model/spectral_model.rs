//! The spectral model document and its query path

use super::closure::{synthesize, ClosureCorrection};
use super::harmonics::HarmonicModel;
use crate::calibration::stats::{db_to_pa2, pa2_to_db};
use crate::config::{BandGrid, InversionMode};
use crate::sweep::binning::BandCurve;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Version stamped into every artifact and cache key
pub const CODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where an artifact came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub audio_hash: String,
    pub params_hash: String,
    pub code_version: String,
    /// Seconds since the Unix epoch
    pub built_at: u64,
}

impl Provenance {
    pub fn new(audio_hash: &str, params_hash: &str) -> Self {
        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            audio_hash: audio_hash.to_string(),
            params_hash: params_hash.to_string(),
            code_version: CODE_VERSION.to_string(),
            built_at,
        }
    }

    /// Same inputs, regardless of when it was built
    pub fn same_inputs(&self, other: &Provenance) -> bool {
        self.audio_hash == other.audio_hash
            && self.params_hash == other.params_hash
            && self.code_version == other.code_version
    }

    /// True if the artifact no longer matches the current inputs or code
    pub fn is_stale(&self, audio_hash: &str, params_hash: &str) -> bool {
        self.audio_hash != audio_hash
            || self.params_hash != params_hash
            || self.code_version != CODE_VERSION
    }
}

/// Sweep-side diagnostics kept with the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepDiagnostics {
    pub mode: InversionMode,
    pub frames: usize,
    pub unstable_frames: usize,
    pub binned_frames: usize,
    pub head_offset_db: Option<f64>,
    pub tail_offset_db: Option<f64>,
    pub widened: bool,
    pub gated_cells: usize,
    pub own_reference: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralModel {
    pub sample_rate: u32,
    pub grid: BandGrid,
    pub bands_per_octave: u32,
    pub rpm_min: f64,
    pub rpm_max: f64,
    pub bin_width: f64,
    pub bin_centers: Vec<f64>,
    pub bands: Vec<BandCurve>,
    pub harmonics: Option<HarmonicModel>,
    pub closure: Option<ClosureCorrection>,
    pub diagnostics: SweepDiagnostics,
}

/// Output of [`SpectralModel::predict`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub rpm: f64,
    /// dB re 20 µPa per band; `None` for bands without a curve
    pub band_db: Vec<Option<f64>>,
    pub total_laeq: f64,
}

impl SpectralModel {
    pub fn band_centers(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.center_hz).collect()
    }

    pub fn nominal_centers(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.nominal_hz).collect()
    }

    /// Bands that carry a curve; harmonics are injected only into these
    pub fn modeled(&self) -> Vec<bool> {
        self.bands.iter().map(|b| b.curve.is_some()).collect()
    }

    /// Per-band level and total LAeq at `rpm` (clamped to the modeled range)
    pub fn predict(&self, rpm: f64) -> Prediction {
        let rpm = rpm.clamp(self.rpm_min, self.rpm_max);
        let centers = self.band_centers();
        let modeled = self.modeled();
        let lines = self
            .harmonics
            .as_ref()
            .map(|h| h.inject(rpm, &centers, &modeled))
            .unwrap_or_else(|| vec![0.0; centers.len()]);

        let band_db: Vec<Option<f64>> = self
            .bands
            .iter()
            .zip(&lines)
            .map(|(band, line)| {
                let curve = band.curve.as_ref()?;
                let energy = db_to_pa2(curve.eval(rpm)) + line;
                (energy > 0.0 && energy.is_finite()).then(|| pa2_to_db(energy))
            })
            .collect();

        let (bands, harmonics) =
            synthesize(&self.bands, self.harmonics.as_ref(), rpm, &centers, &modeled);
        Prediction {
            rpm,
            band_db,
            total_laeq: pa2_to_db(bands + harmonics),
        }
    }
}

/// Cached model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub provenance: Provenance,
    pub model: SpectralModel,
}
