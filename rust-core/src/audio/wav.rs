//! WAV loading with mono down-mix and sample-rate conversion

use crate::error::{CalibError, Result};
use hound::{SampleFormat, WavReader};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;
use tracing::debug;

const RESAMPLE_CHUNK: usize = 4096;

/// Mono recording at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration_sec(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Drop `head_sec` and `tail_sec` from the ends; keeps at least one sample
    /// when the trims would consume the whole recording.
    pub fn trimmed(&self, head_sec: f64, tail_sec: f64) -> &[f64] {
        let n = self.samples.len();
        let fs = self.sample_rate as f64;
        let head = (head_sec * fs).round() as usize;
        let tail = (tail_sec * fs).round() as usize;
        if head + tail >= n {
            return &self.samples;
        }
        &self.samples[head..n - tail]
    }
}

/// Read a WAV file, average channels to mono and resample to `target_rate`
pub fn load_wav(path: &Path, target_rate: u32) -> Result<Recording> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / full_scale))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<_, _>>()?,
    };

    let mono: Vec<f64> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
            .collect()
    };

    if mono.is_empty() {
        return Err(CalibError::EmptyAudio);
    }

    debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        samples = mono.len(),
        "loaded wav"
    );

    let samples = resample(&mono, spec.sample_rate, target_rate)?;
    Ok(Recording {
        samples,
        sample_rate: target_rate,
    })
}

/// Windowed-sinc sample-rate conversion
pub fn resample(samples: &[f64], src_rate: u32, dst_rate: u32) -> Result<Vec<f64>> {
    if src_rate == dst_rate {
        return Ok(samples.to_vec());
    }
    if src_rate == 0 || dst_rate == 0 {
        return Err(CalibError::Resample(format!(
            "invalid sample rate {src_rate} -> {dst_rate}"
        )));
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Quadratic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f64>::new(ratio, 1.1, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| CalibError::Resample(e.to_string()))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut input: Vec<&[f64]> = vec![samples];
    let mut buffer = vec![vec![0.0f64; resampler.output_frames_max()]];

    while input[0].len() >= resampler.input_frames_next() {
        let (consumed, produced) = resampler
            .process_into_buffer(&input, &mut buffer, None)
            .map_err(|e| CalibError::Resample(e.to_string()))?;
        input[0] = &input[0][consumed..];
        out.extend_from_slice(&buffer[0][..produced]);
    }

    if !input[0].is_empty() {
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(input.as_slice()), &mut buffer, None)
            .map_err(|e| CalibError::Resample(e.to_string()))?;
        out.extend_from_slice(&buffer[0][..produced]);
    }

    // flush the interpolator's delay line
    let flush: Option<&[&[f64]]> = None;
    let (_, produced) = resampler
        .process_partial_into_buffer(flush, &mut buffer, None)
        .map_err(|e| CalibError::Resample(e.to_string()))?;
    out.extend_from_slice(&buffer[0][..produced]);

    out.truncate(expected.max(1));
    Ok(out)
}
