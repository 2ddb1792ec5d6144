//! Sweep analysis: absolute framing, RPM-track inversion and binning

pub mod inversion;
pub mod binning;

pub use binning::{bin_sweep, fit_band_curves, BandCurve, BinnedSpectrum};
pub use inversion::{invert, RpmTrack};

use crate::audio::batch::SweepFolder;
use crate::audio::reference::read_reference;
use crate::calibration::{scale_factor, Calibration};
use crate::error::Result;
use crate::spectrum::analysis::{AnalysisWindow, RecordingAnalyzer};
use crate::spectrum::framing::BandFrames;
use tracing::info;

/// A framed sweep in absolute units with its recovered RPM track
#[derive(Debug, Clone)]
pub struct SweepAnalysis {
    /// Pa² per frame and band
    pub frames: BandFrames,
    pub track: RpmTrack,
    pub scale: f64,
    pub own_reference: bool,
}

/// Frame the sweep recording, anchor its scale and invert the RPM track
pub fn analyse_sweep(
    sweep: &SweepFolder,
    calibration: &Calibration,
    analyzer: &RecordingAnalyzer<'_>,
) -> Result<SweepAnalysis> {
    let own_ref = sweep.reference.as_deref().map(read_reference).transpose()?;

    let raw = analyzer.analyse_file(&sweep.audio, AnalysisWindow::Sweep)?;
    let scale = match own_ref {
        Some(laeq) => scale_factor(raw.reference_energy, laeq)?,
        None => calibration.env_scale,
    };
    let frames = raw.frames.scaled(scale);
    let track = invert(&frames, analyzer.layout(), calibration, analyzer.params())?;

    info!(
        frames = track.len(),
        unstable = track.unstable_count(),
        own_reference = own_ref.is_some(),
        "sweep inverted"
    );
    Ok(SweepAnalysis {
        frames,
        track,
        scale,
        own_reference: own_ref.is_some(),
    })
}
