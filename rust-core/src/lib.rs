//! Fan Acoustics - Acoustic Calibration & Spectral Modeling Core
//!
//! Turns a folder of fan recordings (environment, fixed-RPM anchors and an
//! RPM sweep) into a calibrated per-band loudness model queried by RPM.

pub mod audio;
pub mod calibration;
pub mod config;
pub mod digest;
pub mod error;
pub mod filters;
pub mod interp;
pub mod jobs;
pub mod model;
pub mod spectrum;
pub mod sweep;
pub mod telemetry;

pub use audio::AudioBatch;
pub use calibration::{calibrate, Calibration, CalibrationDocument};
pub use config::CalibrationParams;
pub use error::{CalibError, Result};
pub use filters::FilterBankCache;
pub use interp::Pchip;
pub use jobs::{Orchestrator, Target};
pub use model::{build_model, ModelDocument, Prediction, SpectralModel};
