//! Calibration parameters
//!
//! Every tunable of the pipeline lives here with its default. A parameter set is
//! validated once at job start and identified by the SHA-256 of its canonical JSON.

use crate::digest::sha256_hex;
use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Reference sound pressure, 20 µPa.
pub const PA0: f64 = 20e-6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BandGrid {
    /// Octave ratio `10^(3/10)` (IEC 61260 base-ten)
    Base10,
    /// Octave ratio exactly 2
    Base2,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EngineChoice {
    Psd,
    FilterBank,
    /// PSD for short files, filter bank above `long_file_sec`
    Auto,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Butterworth,
    Fir,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregate {
    Quantile,
    Mean,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InversionMode {
    LaOnly,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioParams {
    /// Analysis sample rate; recordings are resampled to it
    pub sample_rate: u32,
    pub trim_head_sec: f64,
    pub trim_tail_sec: f64,
    /// High-pass cutoff applied before short-file framing (0 disables)
    pub highpass_hz: f64,
    pub highpass_order: usize,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            trim_head_sec: 0.5,
            trim_tail_sec: 0.5,
            highpass_hz: 20.0,
            highpass_order: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BandParams {
    pub bands_per_octave: u32,
    pub fmin: f64,
    pub fmax: f64,
    pub grid: BandGrid,
    /// Fraction of Nyquist an upper band edge must stay below
    pub nyquist_margin: f64,
}

impl Default for BandParams {
    fn default() -> Self {
        Self {
            bands_per_octave: 3,
            fmin: 25.0,
            fmax: 16_000.0,
            grid: BandGrid::Base10,
            nyquist_margin: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FramingParams {
    pub frame_sec: f64,
    pub hop_sec: f64,
    pub sweep_frame_sec: f64,
    pub sweep_hop_sec: f64,
    pub engine: EngineChoice,
    pub long_file_sec: f64,
    pub filter: FilterKind,
    /// Butterworth prototype order; the bandpass has this many biquads
    pub butterworth_order: usize,
    /// FIR transition width as a fraction of the band bandwidth
    pub fir_transition: f64,
    pub fir_max_taps: usize,
}

impl Default for FramingParams {
    fn default() -> Self {
        Self {
            frame_sec: 1.0,
            hop_sec: 0.5,
            sweep_frame_sec: 0.5,
            sweep_hop_sec: 0.25,
            engine: EngineChoice::Auto,
            long_file_sec: 30.0,
            filter: FilterKind::Butterworth,
            butterworth_order: 4,
            fir_transition: 0.5,
            fir_max_taps: 16_385,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RobustParams {
    /// Fraction of lowest-energy frames kept
    pub frame_keep_quantile: f64,
    /// MAD clipping threshold τ; `None` disables clipping
    pub mad_tau: Option<f64>,
    pub aggregate: Aggregate,
    pub aggregate_quantile: f64,
    /// Percentile of robust env frames used as per-band baseline
    pub env_percentile: f64,
    /// Force non-negative slopes on the RPM→LAeq curves
    pub monotone_curve: bool,
    /// Lowest env-subtracted level relative to raw, dB
    pub sub_floor_db: f64,
}

impl Default for RobustParams {
    fn default() -> Self {
        Self {
            frame_keep_quantile: 0.5,
            mad_tau: Some(3.0),
            aggregate: Aggregate::Quantile,
            aggregate_quantile: 0.5,
            env_percentile: 30.0,
            monotone_curve: true,
            sub_floor_db: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepParams {
    pub rpm_grid_step: f64,
    pub mode: InversionMode,
    pub head_lock_sec: f64,
    pub tail_lock_sec: f64,
    pub median_window: usize,
    /// Rate limit applied to the filtered track, RPM/s
    pub max_rpm_rate: f64,
    pub unstable_rpm_rate: f64,
    /// dB/s
    pub unstable_la_rate: f64,
    pub exclude_unstable: bool,
    pub w_la: f64,
    pub w_h_max: f64,
    pub snr_lo_db: f64,
    pub snr_hi_db: f64,
    /// Expected level drop per harmonic order, dB
    pub harmonic_decay_db: f64,
    pub hybrid_orders: usize,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            rpm_grid_step: 1.0,
            mode: InversionMode::LaOnly,
            head_lock_sec: 1.0,
            tail_lock_sec: 1.0,
            median_window: 5,
            max_rpm_rate: 500.0,
            unstable_rpm_rate: 1_000.0,
            unstable_la_rate: 6.0,
            exclude_unstable: true,
            w_la: 1.0,
            w_h_max: 3.0,
            snr_lo_db: 3.0,
            snr_hi_db: 10.0,
            harmonic_decay_db: 3.0,
            hybrid_orders: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinningParams {
    pub bin_width_rpm: f64,
    /// Bin-level quantile cut on total frame energy
    pub keep_quantile: f64,
    pub min_effective_frames: f64,
    pub widen_factor: f64,
    pub snr_min_db: f64,
    pub snr_min_db_low: f64,
    pub low_freq_cutoff_hz: f64,
    pub lf_smoothing: bool,
    pub lf_min_points: usize,
}

impl Default for BinningParams {
    fn default() -> Self {
        Self {
            bin_width_rpm: 50.0,
            keep_quantile: 0.5,
            min_effective_frames: 2.0,
            widen_factor: 2.0,
            snr_min_db: 1.0,
            snr_min_db_low: 3.0,
            low_freq_cutoff_hz: 200.0,
            lf_smoothing: true,
            lf_min_points: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarmonicParams {
    pub enabled: bool,
    pub blades: Option<u32>,
    pub max_order: usize,
    /// Bands on each side used for the local baseline
    pub neighbor_bands: usize,
    /// Injection kernel width in octaves; `None` uses half a band
    pub kernel_sigma_oct: Option<f64>,
    pub closure: bool,
}

impl Default for HarmonicParams {
    fn default() -> Self {
        Self {
            enabled: false,
            blades: None,
            max_order: 8,
            neighbor_bands: 2,
            kernel_sigma_oct: None,
            closure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CalibrationParams {
    #[serde(default)]
    pub audio: AudioParams,
    #[serde(default)]
    pub bands: BandParams,
    #[serde(default)]
    pub framing: FramingParams,
    #[serde(default)]
    pub robust: RobustParams,
    #[serde(default)]
    pub sweep: SweepParams,
    #[serde(default)]
    pub binning: BinningParams,
    #[serde(default)]
    pub harmonics: HarmonicParams,
}

fn check(ok: bool, field: &'static str, reason: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(CalibError::config(field, reason))
    }
}

fn unit_interval(v: f64) -> bool {
    v > 0.0 && v <= 1.0
}

impl CalibrationParams {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve a named configuration `<dir>/<name>.toml`. The name `default`
    /// falls back to built-in defaults when no file exists.
    pub fn load_named(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}.toml"));
        if path.exists() {
            return Self::load(&path);
        }
        if name == "default" {
            return Ok(Self::default());
        }
        Err(CalibError::config("name", format!("no configuration named `{name}`")))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CalibError::config("params", e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.audio;
        check(a.sample_rate >= 1_000, "audio.sample_rate", "must be at least 1000 Hz")?;
        check(a.trim_head_sec >= 0.0 && a.trim_tail_sec >= 0.0, "audio.trim", "must be >= 0")?;
        check(a.highpass_hz >= 0.0, "audio.highpass_hz", "must be >= 0")?;
        check(a.highpass_order >= 1, "audio.highpass_order", "must be >= 1")?;

        let b = &self.bands;
        check((1..=24).contains(&b.bands_per_octave), "bands.bands_per_octave", "must be 1..=24")?;
        check(b.fmin > 0.0 && b.fmax > b.fmin, "bands.fmin/fmax", "need 0 < fmin < fmax")?;
        check(unit_interval(b.nyquist_margin), "bands.nyquist_margin", "must be in (0, 1]")?;

        let f = &self.framing;
        check(f.frame_sec > 0.0 && f.hop_sec > 0.0, "framing.frame_sec", "must be > 0")?;
        check(f.hop_sec <= f.frame_sec, "framing.hop_sec", "must not exceed frame_sec")?;
        check(
            f.sweep_frame_sec > 0.0
                && f.sweep_hop_sec > 0.0
                && f.sweep_hop_sec <= f.sweep_frame_sec,
            "framing.sweep_hop_sec",
            "need 0 < sweep_hop_sec <= sweep_frame_sec",
        )?;
        check(
            (1..=12).contains(&f.butterworth_order),
            "framing.butterworth_order",
            "must be 1..=12",
        )?;
        check(f.fir_transition > 0.0, "framing.fir_transition", "must be > 0")?;
        check(f.fir_max_taps >= 3, "framing.fir_max_taps", "must be >= 3")?;

        let r = &self.robust;
        let quantile_msg = "must be in (0, 1]";
        check(unit_interval(r.frame_keep_quantile), "robust.frame_keep_quantile", quantile_msg)?;
        check(unit_interval(r.aggregate_quantile), "robust.aggregate_quantile", quantile_msg)?;
        check(
            (0.0..=100.0).contains(&r.env_percentile),
            "robust.env_percentile",
            "must be 0..=100",
        )?;
        check(r.mad_tau.map_or(true, |t| t > 0.0), "robust.mad_tau", "must be > 0")?;
        check(r.sub_floor_db > 0.0, "robust.sub_floor_db", "must be > 0")?;

        let s = &self.sweep;
        check(s.rpm_grid_step > 0.0, "sweep.rpm_grid_step", "must be > 0")?;
        check(s.median_window % 2 == 1, "sweep.median_window", "must be odd")?;
        check(s.max_rpm_rate > 0.0, "sweep.max_rpm_rate", "must be > 0")?;
        check(s.snr_hi_db > s.snr_lo_db, "sweep.snr_hi_db", "must exceed snr_lo_db")?;
        check(s.w_la >= 0.0 && s.w_h_max >= 0.0, "sweep.w_la", "weights must be >= 0")?;

        let n = &self.binning;
        check(n.bin_width_rpm > 0.0, "binning.bin_width_rpm", "must be > 0")?;
        check(unit_interval(n.keep_quantile), "binning.keep_quantile", "must be in (0, 1]")?;
        check(n.widen_factor > 1.0, "binning.widen_factor", "must be > 1")?;

        let h = &self.harmonics;
        check(h.blades.map_or(true, |b| b > 0), "harmonics.blades", "must be > 0")?;
        check(
            h.kernel_sigma_oct.map_or(true, |s| s > 0.0),
            "harmonics.kernel_sigma_oct",
            "must be > 0",
        )?;
        Ok(())
    }

    /// SHA-256 of the canonical JSON encoding.
    pub fn params_hash(&self) -> Result<String> {
        Ok(sha256_hex(&serde_json::to_vec(self)?))
    }

    pub fn nyquist(&self) -> f64 {
        self.audio.sample_rate as f64 / 2.0
    }
}
