//! Error types shared across the calibration pipeline

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibError {
    #[error("Required directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("No audio/reference pair in {0}")]
    MissingPair(PathBuf),

    #[error("Ambiguous recording folder {dir}: {detail}")]
    Ambiguous { dir: PathBuf, detail: String },

    #[error("Reference value missing or illegible in {0}")]
    Reference(PathBuf),

    #[error("Audio set is empty")]
    EmptyAudio,

    #[error("No RPM folders found under {0}")]
    NoRpmNodes(PathBuf),

    #[error("Sweep recording too short: {0} frame(s), need at least 2")]
    SweepTooShort(usize),

    #[error("Invalid parameter `{field}`: {reason}")]
    Config { field: &'static str, reason: String },

    #[error("Numeric failure: {0}")]
    Numeric(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Job {0} not found")]
    UnknownJob(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CalibError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            field,
            reason: reason.into(),
        }
    }

    /// Structural errors abort a job before any numeric work starts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingDir(_)
                | Self::MissingPair(_)
                | Self::Ambiguous { .. }
                | Self::Reference(_)
                | Self::EmptyAudio
                | Self::NoRpmNodes(_)
                | Self::SweepTooShort(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CalibError>;
