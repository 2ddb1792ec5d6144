//! Synthetic recording batches for integration tests

#![allow(dead_code)]

use fan_acoustics::CalibrationParams;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FS: u32 = 16_000;
pub const ENV_LAEQ: f64 = 30.0;
pub const ENV_AMP: f64 = 0.002;
/// Fan noise amplitude at 1000 and 2000 RPM
pub const FAN_AMP: (f64, f64) = (0.02, 0.06);
/// Blade tone amplitude relative to the fan noise amplitude
pub const BLADE_TONE: f64 = 0.5;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct TempDir(pub PathBuf);

impl TempDir {
    pub fn new(tag: &str) -> Self {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = format!("fan-acoustics-{tag}-{}-{n}", std::process::id());
        let path = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Deterministic uniform noise in [-1, 1)
pub struct Noise(u64);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Noise(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    pub fn next(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        2.0 * ((self.0 >> 11) as f64 / (1u64 << 53) as f64) - 1.0
    }
}

pub fn write_wav(path: &Path, samples: &[f64], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s as f32).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn write_reference(path: &Path, laeq: f64) {
    fs::write(path, format!("Meter export\nLAeq , T = {laeq:.3}\n")).unwrap();
}

/// Environment noise plus fan noise whose amplitude follows `fan_amp(t)`
fn recording(seconds: f64, seed: u64, fan_amp: impl Fn(f64) -> f64) -> Vec<f64> {
    let n = (seconds * FS as f64) as usize;
    let mut env = Noise::new(seed);
    let mut fan = Noise::new(seed + 1_000);
    (0..n)
        .map(|i| {
            let t = i as f64 / FS as f64;
            ENV_AMP * env.next() + fan_amp(t) * fan.next()
        })
        .collect()
}

/// Add a blade-passing tone tracking `rpm(t)`, at `level` times the fan amplitude
fn add_blade_tone(samples: &mut [f64], blades: u32, level: f64, rpm: impl Fn(f64) -> f64) {
    let mut phase = 0.0;
    for (i, s) in samples.iter_mut().enumerate() {
        let r = rpm(i as f64 / FS as f64);
        phase += 2.0 * std::f64::consts::PI * blades as f64 * r / 60.0 / FS as f64;
        *s += level * fan_amp_at(r) * phase.sin();
    }
}

/// Meter reading implied by a fan amplitude, relative to the environment
pub fn anchor_laeq(fan_amp: f64) -> f64 {
    ENV_LAEQ + 10.0 * ((fan_amp * fan_amp + ENV_AMP * ENV_AMP) / (ENV_AMP * ENV_AMP)).log10()
}

/// Fan amplitude at `rpm`, log-linear between the two anchors
pub fn fan_amp_at(rpm: f64) -> f64 {
    let x = ((rpm - 1000.0) / 1000.0).clamp(0.0, 1.0);
    FAN_AMP.0 * (FAN_AMP.1 / FAN_AMP.0).powf(x)
}

/// env/, R1000/, R2000/ and optionally a 1000 → 2000 RPM linear sweep
pub fn write_batch(root: &Path, with_sweep: bool) {
    write_batch_with(root, with_sweep, None);
}

/// Like [`write_batch`], with a blade-passing tone on every fan recording
/// when `blades` is set
pub fn write_batch_with(root: &Path, with_sweep: bool, blades: Option<u32>) {
    let tone = |samples: &mut Vec<f64>, rpm: &dyn Fn(f64) -> f64| {
        if let Some(blades) = blades {
            add_blade_tone(samples, blades, BLADE_TONE, rpm);
        }
    };

    let env = root.join("env");
    fs::create_dir_all(&env).unwrap();
    write_wav(&env.join("env.wav"), &recording(4.0, 1, |_| 0.0), FS);
    write_reference(&env.join("env.txt"), ENV_LAEQ);

    let r1000 = root.join("R1000");
    fs::create_dir_all(&r1000).unwrap();
    let mut samples = recording(4.0, 2, |_| FAN_AMP.0);
    tone(&mut samples, &|_| 1000.0);
    write_wav(&r1000.join("r1000.wav"), &samples, FS);
    write_reference(&r1000.join("r1000.txt"), anchor_laeq(FAN_AMP.0));

    let r2000 = root.join("R2000");
    fs::create_dir_all(&r2000).unwrap();
    let mut samples = recording(4.0, 3, |_| FAN_AMP.1);
    tone(&mut samples, &|_| 2000.0);
    write_wav(&r2000.join("r2000.wav"), &samples, FS);

    if with_sweep {
        let sweep = root.join("sweep");
        fs::create_dir_all(&sweep).unwrap();
        let duration = 20.0;
        let rpm = |t: f64| 1000.0 + 1000.0 * t / duration;
        let mut samples = recording(duration, 4, |t| fan_amp_at(rpm(t)));
        tone(&mut samples, &rpm);
        write_wav(&sweep.join("sweep.wav"), &samples, FS);
    }
}

pub fn params() -> CalibrationParams {
    let mut params = CalibrationParams::default();
    params.audio.sample_rate = FS;
    params
}
