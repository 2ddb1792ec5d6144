//! Fractional-octave bands, A-weighting and per-frame band energy

pub mod bands;
pub mod weighting;
pub mod fft;
pub mod framing;
pub mod analysis;

pub use analysis::{AnalysedRecording, AnalysisWindow, RecordingAnalyzer};
pub use bands::{Band, BandLayout};
pub use fft::PsdEngine;
pub use framing::{
    select_engine, BandEnergy, BandFrames, FilterBankFraming, FrameSpec, PsdIntegration,
};
pub use weighting::{a_weighting_db, a_weighting_power_gain};
