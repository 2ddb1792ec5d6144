//! Recording analyzer
//!
//! Loads a recording, conditions it (trim + high-pass) and frames it into
//! A-weighted band energies with the configured engine. The meter reference
//! energy is taken from the unconditioned recording.

use super::bands::BandLayout;
use super::framing::{select_engine, BandFrames, FrameSpec};
use crate::audio::wav::{load_wav, Recording};
use crate::config::CalibrationParams;
use crate::error::Result;
use crate::filters::cache::FilterBankCache;
use crate::filters::design::design_butterworth_highpass;
use crate::filters::sos::SosFilter;
use std::path::Path;
use tracing::debug;

/// Which frame geometry to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisWindow {
    /// `frame_sec` / `hop_sec`, for env and RPM clips
    Short,
    /// `sweep_frame_sec` / `sweep_hop_sec`
    Sweep,
}

pub struct RecordingAnalyzer<'a> {
    params: &'a CalibrationParams,
    layout: BandLayout,
    filters: &'a FilterBankCache,
    highpass: Option<SosFilter>,
}

impl<'a> RecordingAnalyzer<'a> {
    pub fn new(params: &'a CalibrationParams, filters: &'a FilterBankCache) -> Self {
        let fs = params.audio.sample_rate;
        let layout = BandLayout::new(&params.bands, fs);
        let hp = params.audio.highpass_hz;
        let highpass = (hp > 0.0 && hp < params.nyquist())
            .then(|| design_butterworth_highpass(params.audio.highpass_order, hp, fs as f64));
        Self {
            params,
            layout,
            filters,
            highpass,
        }
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    pub fn params(&self) -> &CalibrationParams {
        self.params
    }

    /// Trim head/tail and apply the high-pass
    pub fn condition(&self, recording: &Recording) -> Vec<f64> {
        let audio = &self.params.audio;
        let trimmed = recording.trimmed(audio.trim_head_sec, audio.trim_tail_sec);
        match &self.highpass {
            Some(hp) => hp.apply(trimmed),
            None => trimmed.to_vec(),
        }
    }

    pub fn analyse_signal(&self, signal: &[f64], window: AnalysisWindow) -> Result<BandFrames> {
        let framing = &self.params.framing;
        let fs = self.params.audio.sample_rate as f64;
        let spec = match window {
            AnalysisWindow::Short => {
                FrameSpec::from_seconds(framing.frame_sec, framing.hop_sec, fs)
            }
            AnalysisWindow::Sweep => {
                FrameSpec::from_seconds(framing.sweep_frame_sec, framing.sweep_hop_sec, fs)
            }
        };
        let duration = signal.len() as f64 / fs;
        let engine = select_engine(framing, duration, &self.layout, self.filters);
        debug!(engine = engine.name(), duration_sec = duration, "framing recording");
        engine.frame_energies(signal, spec, &self.layout)
    }

    /// Frame a recording twice: untouched for its reference energy, then
    /// conditioned for frame statistics
    pub fn analyse_recording(
        &self,
        recording: &Recording,
        window: AnalysisWindow,
    ) -> Result<AnalysedRecording> {
        let reference_energy = self
            .analyse_signal(&recording.samples, window)?
            .whole_file_total();
        let frames = self.analyse_signal(&self.condition(recording), window)?;
        Ok(AnalysedRecording {
            frames,
            reference_energy,
        })
    }

    /// Load and analyse a WAV file
    pub fn analyse_file(&self, path: &Path, window: AnalysisWindow) -> Result<AnalysedRecording> {
        let recording = load_wav(path, self.params.audio.sample_rate)?;
        self.analyse_recording(&recording, window)
    }
}

/// A framed recording and the energy its meter reading refers to
#[derive(Debug, Clone)]
pub struct AnalysedRecording {
    /// Trimmed, high-passed frames
    pub frames: BandFrames,
    /// Mean frame energy of the whole, unfiltered recording
    pub reference_energy: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn highpass_removes_rumble() {
        let mut params = CalibrationParams::default();
        params.audio.sample_rate = 8_000;
        params.audio.highpass_hz = 100.0;
        params.audio.highpass_order = 4;
        params.audio.trim_head_sec = 0.0;
        params.audio.trim_tail_sec = 0.0;
        let filters = FilterBankCache::new();
        let analyzer = RecordingAnalyzer::new(&params, &filters);

        let rec = Recording {
            samples: (0..16_000).map(|i| (2.0 * PI * 10.0 * i as f64 / 8000.0).sin()).collect(),
            sample_rate: 8_000,
        };
        let out = analyzer.condition(&rec);
        let tail = &out[8_000..];
        let ms = tail.iter().map(|x| x * x).sum::<f64>() / tail.len() as f64;
        assert!(ms < 1e-4, "residual {ms}");
    }

    #[test]
    fn sweep_window_uses_sweep_geometry() {
        let mut params = CalibrationParams::default();
        params.audio.sample_rate = 8_000;
        let filters = FilterBankCache::new();
        let analyzer = RecordingAnalyzer::new(&params, &filters);
        let signal = vec![0.01; 8_000 * 4];

        let short = analyzer.analyse_signal(&signal, AnalysisWindow::Short).unwrap();
        let sweep = analyzer.analyse_signal(&signal, AnalysisWindow::Sweep).unwrap();
        assert_eq!(short.n_frames(), 7);
        assert_eq!(sweep.n_frames(), 15);
        assert_eq!(short.n_bands(), analyzer.layout().len());
    }

    #[test]
    fn trimming_leaves_reference_energy_alone() {
        let rec = Recording {
            samples: (0..8_000 * 4)
                .map(|i| {
                    let gain = if i < 8_000 { 1.0 } else { 0.1 };
                    gain * (2.0 * PI * 500.0 * i as f64 / 8000.0).sin()
                })
                .collect(),
            sample_rate: 8_000,
        };
        let filters = FilterBankCache::new();
        let analyse = |head: f64| {
            let mut params = CalibrationParams::default();
            params.audio.sample_rate = 8_000;
            params.audio.trim_head_sec = head;
            params.audio.trim_tail_sec = 0.0;
            RecordingAnalyzer::new(&params, &filters)
                .analyse_recording(&rec, AnalysisWindow::Short)
                .unwrap()
        };

        let (full, trimmed) = (analyse(0.0), analyse(1.5));
        let drift = (full.reference_energy - trimmed.reference_energy).abs();
        assert!(drift <= 1e-12 * full.reference_energy);
        // the loud first second only survives in the untrimmed frames
        assert!(trimmed.frames.whole_file_total() < 0.5 * full.frames.whole_file_total());
    }
}
