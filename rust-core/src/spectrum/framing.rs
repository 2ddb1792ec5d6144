//! Per-frame A-weighted band energy
//!
//! Two engines produce the same quantity (A-weighted mean-square pressure per
//! band and frame, in squared input units):
//! - [`PsdIntegration`]: periodogram density integrated over each band's edges
//! - [`FilterBankFraming`]: persistent band filters, squared and box-averaged
//!
//! Both sit behind [`BandEnergy`] and are picked by [`select_engine`].

use super::bands::BandLayout;
use super::fft::PsdEngine;
use super::weighting::a_weighting_power_gain;
use crate::config::{EngineChoice, FramingParams};
use crate::error::{CalibError, Result};
use crate::filters::cache::{FilterBank, FilterBankCache};
use ndarray::{Array2, ArrayView1, Axis};
use std::sync::Arc;

/// Frame geometry in samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpec {
    pub frame_len: usize,
    pub hop: usize,
    pub sample_rate: f64,
}

impl FrameSpec {
    pub fn from_seconds(frame_sec: f64, hop_sec: f64, sample_rate: f64) -> Self {
        Self {
            frame_len: ((frame_sec * sample_rate).round() as usize).max(2),
            hop: ((hop_sec * sample_rate).round() as usize).max(1),
            sample_rate,
        }
    }

    /// Shrink the frame to the signal when the signal is shorter than one frame
    pub fn fitted_to(self, n_samples: usize) -> Self {
        if n_samples < self.frame_len {
            Self {
                frame_len: n_samples.max(2),
                ..self
            }
        } else {
            self
        }
    }

    pub fn frame_count(&self, n_samples: usize) -> usize {
        if n_samples < self.frame_len {
            0
        } else {
            1 + (n_samples - self.frame_len) / self.hop
        }
    }

    pub fn frame_start(&self, index: usize) -> usize {
        index * self.hop
    }

    pub fn frame_center_sec(&self, index: usize) -> f64 {
        (self.frame_start(index) as f64 + self.frame_len as f64 / 2.0) / self.sample_rate
    }
}

/// Frame × band energy matrix; unusable bands hold NaN
#[derive(Debug, Clone, PartialEq)]
pub struct BandFrames {
    pub energies: Array2<f64>,
    pub usable: Vec<bool>,
    /// Frame center times, seconds
    pub times: Vec<f64>,
    pub hop_sec: f64,
    pub duration_sec: f64,
}

impl BandFrames {
    pub fn n_frames(&self) -> usize {
        self.energies.nrows()
    }

    pub fn n_bands(&self) -> usize {
        self.energies.ncols()
    }

    pub fn row(&self, frame: usize) -> ArrayView1<'_, f64> {
        self.energies.row(frame)
    }

    /// Total energy of one frame over usable, finite bands
    pub fn frame_total(&self, frame: usize) -> f64 {
        self.row(frame)
            .iter()
            .zip(&self.usable)
            .filter(|(e, &u)| u && e.is_finite())
            .map(|(e, _)| *e)
            .sum()
    }

    pub fn totals(&self) -> Vec<f64> {
        (0..self.n_frames()).map(|i| self.frame_total(i)).collect()
    }

    /// Whole-file band energy: mean over frames, `None` for unusable bands
    pub fn whole_file(&self) -> Vec<Option<f64>> {
        let means = self.energies.mean_axis(Axis(0));
        (0..self.n_bands())
            .map(|b| {
                let m = means.as_ref().map(|m| m[b]).unwrap_or(f64::NAN);
                (self.usable[b] && m.is_finite()).then_some(m)
            })
            .collect()
    }

    pub fn whole_file_total(&self) -> f64 {
        self.whole_file().iter().flatten().sum()
    }

    /// Multiply every energy by an absolute scale factor s²
    pub fn scaled(&self, s2: f64) -> Self {
        Self {
            energies: &self.energies * s2,
            ..self.clone()
        }
    }

    /// Keep only the listed frames
    pub fn select(&self, frames: &[usize]) -> Self {
        Self {
            energies: self.energies.select(Axis(0), frames),
            times: frames.iter().map(|&i| self.times[i]).collect(),
            ..self.clone()
        }
    }
}

/// A-weighted band-energy framing strategy
pub trait BandEnergy {
    fn name(&self) -> &'static str;

    fn frame_energies(
        &self,
        signal: &[f64],
        spec: FrameSpec,
        layout: &BandLayout,
    ) -> Result<BandFrames>;
}

fn empty_frames(n_frames: usize, layout: &BandLayout) -> Array2<f64> {
    Array2::from_elem((n_frames, layout.len()), f64::NAN)
}

fn prepare(signal: &[f64], spec: FrameSpec) -> Result<(FrameSpec, usize)> {
    if signal.len() < 2 {
        return Err(CalibError::EmptyAudio);
    }
    let spec = spec.fitted_to(signal.len());
    Ok((spec, spec.frame_count(signal.len())))
}

fn frame_times(spec: FrameSpec, n_frames: usize) -> Vec<f64> {
    (0..n_frames).map(|i| spec.frame_center_sec(i)).collect()
}

/// Engine A: periodogram density, A-weighted per bin, summed over band edges
#[derive(Debug, Default, Clone, Copy)]
pub struct PsdIntegration;

impl BandEnergy for PsdIntegration {
    fn name(&self) -> &'static str {
        "psd"
    }

    fn frame_energies(
        &self,
        signal: &[f64],
        spec: FrameSpec,
        layout: &BandLayout,
    ) -> Result<BandFrames> {
        let (spec, n_frames) = prepare(signal, spec)?;
        let mut engine = PsdEngine::new(spec.frame_len, spec.sample_rate);
        let df = engine.bin_width_hz();

        // (bin, A² · Δf) per band
        let weights: Vec<Vec<(usize, f64)>> = layout
            .bands
            .iter()
            .map(|band| {
                if !band.usable {
                    return Vec::new();
                }
                (1..engine.num_bins())
                    .filter(|&k| band.contains(engine.bin_to_hz(k)))
                    .map(|k| (k, a_weighting_power_gain(engine.bin_to_hz(k)) * df))
                    .collect()
            })
            .collect();
        let usable: Vec<bool> = weights.iter().map(|w| !w.is_empty()).collect();

        let mut energies = empty_frames(n_frames, layout);
        for i in 0..n_frames {
            let start = spec.frame_start(i);
            let psd = engine.density(&signal[start..start + spec.frame_len])?;
            for (b, band_weights) in weights.iter().enumerate() {
                if band_weights.is_empty() {
                    continue;
                }
                energies[[i, b]] = band_weights.iter().map(|&(k, w)| psd[k] * w).sum();
            }
        }

        Ok(BandFrames {
            energies,
            usable,
            times: frame_times(spec, n_frames),
            hop_sec: spec.hop as f64 / spec.sample_rate,
            duration_sec: signal.len() as f64 / spec.sample_rate,
        })
    }
}

/// Engine B: persistent filter bank, squared output box-averaged over frames
#[derive(Debug, Clone)]
pub struct FilterBankFraming {
    bank: Arc<FilterBank>,
}

impl FilterBankFraming {
    pub fn new(bank: Arc<FilterBank>) -> Self {
        Self { bank }
    }
}

impl BandEnergy for FilterBankFraming {
    fn name(&self) -> &'static str {
        "filter-bank"
    }

    fn frame_energies(
        &self,
        signal: &[f64],
        spec: FrameSpec,
        layout: &BandLayout,
    ) -> Result<BandFrames> {
        let (spec, n_frames) = prepare(signal, spec)?;
        let mut energies = empty_frames(n_frames, layout);
        let mut usable = vec![false; layout.len()];

        for (b, band) in layout.bands.iter().enumerate() {
            let Some(filter) = self.bank.get(b) else {
                continue;
            };
            usable[b] = true;
            let gain = a_weighting_power_gain(band.center);
            let delay = filter.delay_samples();
            let filtered = filter.apply(signal);

            // prefix sums of y², so each box average is O(1)
            let mut prefix = Vec::with_capacity(filtered.len() + 1);
            prefix.push(0.0);
            let mut acc = 0.0;
            for y in &filtered {
                acc += y * y;
                prefix.push(acc);
            }

            for i in 0..n_frames {
                let start = (spec.frame_start(i) + delay).min(filtered.len());
                let end = (start + spec.frame_len).min(filtered.len());
                if end > start {
                    energies[[i, b]] = gain * (prefix[end] - prefix[start]) / (end - start) as f64;
                }
            }
        }

        Ok(BandFrames {
            energies,
            usable,
            times: frame_times(spec, n_frames),
            hop_sec: spec.hop as f64 / spec.sample_rate,
            duration_sec: signal.len() as f64 / spec.sample_rate,
        })
    }
}

/// Pick the framing engine for a recording of `duration_sec`
pub fn select_engine(
    framing: &FramingParams,
    duration_sec: f64,
    layout: &BandLayout,
    filters: &FilterBankCache,
) -> Box<dyn BandEnergy> {
    let use_bank = match framing.engine {
        EngineChoice::Psd => false,
        EngineChoice::FilterBank => true,
        EngineChoice::Auto => duration_sec > framing.long_file_sec,
    };
    if use_bank {
        Box::new(FilterBankFraming::new(filters.get_or_design(layout, framing)))
    } else {
        Box::new(PsdIntegration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandParams, FilterKind};
    use std::f64::consts::PI;

    const FS: f64 = 16_000.0;

    fn layout() -> BandLayout {
        BandLayout::new(
            &BandParams {
                fmin: 100.0,
                fmax: 10_000.0,
                ..BandParams::default()
            },
            FS as u32,
        )
    }

    fn tone(freq: f64, amp: f64, seconds: f64) -> Vec<f64> {
        (0..(seconds * FS) as usize)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / FS).sin())
            .collect()
    }

    #[test]
    fn frame_geometry() {
        let spec = FrameSpec::from_seconds(1.0, 0.5, FS);
        assert_eq!(spec.frame_count(16_000), 1);
        assert_eq!(spec.frame_count(40_000), 4);
        assert_eq!(spec.frame_count(100), 0);
        assert_eq!(spec.fitted_to(100).frame_count(100), 1);
        assert!((spec.frame_center_sec(1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn psd_engine_puts_tone_in_its_band() {
        let l = layout();
        let frames = PsdIntegration
            .frame_energies(&tone(1000.0, 1.0, 2.0), FrameSpec::from_seconds(0.5, 0.25, FS), &l)
            .unwrap();
        let band = l.band_containing(1000.0).unwrap();
        let whole = frames.whole_file();
        let e = whole[band].unwrap();
        // 0.5 mean square, A-weighting ~0 dB at 1 kHz
        assert!((e - 0.5).abs() < 0.01, "energy {e}");
        assert!((frames.whole_file_total() - 0.5).abs() < 0.02);
    }

    #[test]
    fn engines_agree_on_band_energy() {
        let l = layout();
        let spec = FrameSpec::from_seconds(0.5, 0.25, FS);
        let signal: Vec<f64> = tone(500.0, 1.0, 3.0)
            .iter()
            .zip(tone(2000.0, 0.5, 3.0))
            .map(|(a, b)| a + b)
            .collect();

        let cache = FilterBankCache::new();
        let psd = PsdIntegration.frame_energies(&signal, spec, &l).unwrap();
        for kind in [FilterKind::Butterworth, FilterKind::Fir] {
            let framing = FramingParams {
                filter: kind,
                ..FramingParams::default()
            };
            let bank = FilterBankFraming::new(cache.get_or_design(&l, &framing))
                .frame_energies(&signal, spec, &l)
                .unwrap();
            assert_eq!(bank.n_frames(), psd.n_frames());

            let db = |e: f64| 10.0 * e.log10();
            let (a, b) = (psd.whole_file_total(), bank.whole_file_total());
            assert!((db(a) - db(b)).abs() < 0.5, "{kind:?}: psd {a} bank {b}");
        }
    }

    #[test]
    fn unusable_bands_stay_null() {
        let l = BandLayout::new(&BandParams::default(), 8_000);
        let spec = FrameSpec::from_seconds(0.5, 0.25, 8_000.0);
        let frames = PsdIntegration
            .frame_energies(&tone(1000.0, 1.0, 1.0), spec, &l)
            .unwrap();
        for (b, band) in l.bands.iter().enumerate() {
            if !band.usable {
                assert!(frames.whole_file()[b].is_none());
                assert!(frames.energies[[0, b]].is_nan());
            }
        }
    }

    #[test]
    fn short_signal_is_one_frame() {
        let l = layout();
        let frames = PsdIntegration
            .frame_energies(&tone(1000.0, 1.0, 0.1), FrameSpec::from_seconds(1.0, 0.5, FS), &l)
            .unwrap();
        assert_eq!(frames.n_frames(), 1);
    }

    #[test]
    fn empty_signal_is_rejected() {
        let err = PsdIntegration
            .frame_energies(&[], FrameSpec::from_seconds(1.0, 0.5, FS), &layout())
            .unwrap_err();
        assert!(matches!(err, CalibError::EmptyAudio));
    }

    #[test]
    fn auto_engine_switches_on_duration() {
        let cache = FilterBankCache::new();
        let framing = FramingParams::default();
        assert_eq!(select_engine(&framing, 5.0, &layout(), &cache).name(), "psd");
        assert_eq!(select_engine(&framing, 120.0, &layout(), &cache).name(), "filter-bank");
        assert_eq!(cache.len(), 1);
    }
}
