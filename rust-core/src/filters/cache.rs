//! Persistent band filter banks and their design cache
//!
//! Designing a long-sweep bank is expensive (FIR lengths grow as bands narrow)
//! and the coefficients depend only on the design key, so banks are built once
//! per process and shared read-only between jobs.

use super::design::{design_bandpass_fir, design_butterworth_bandpass};
use super::fast_fir::FastFirFilter;
use super::fir::FirFilter;
use super::sos::SosFilter;
use super::windows::WindowType;
use crate::config::{BandGrid, FilterKind, FramingParams};
use crate::spectrum::bands::BandLayout;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// FIRs shorter than this are convolved directly
const DIRECT_FIR_MAX_TAPS: usize = 64;

const FFT_BLOCK_SIZE: usize = 8192;

/// One designed band filter
#[derive(Debug)]
pub enum BandFilter {
    Sos(SosFilter),
    Fir(FirFilter),
    FastFir(FastFirFilter),
}

impl BandFilter {
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        match self {
            BandFilter::Sos(f) => f.apply(input),
            BandFilter::Fir(f) => f.apply(input),
            BandFilter::FastFir(f) => f.apply(input),
        }
    }

    /// Output lag to compensate when aligning frames (linear-phase FIR only)
    pub fn delay_samples(&self) -> usize {
        match self {
            BandFilter::Sos(_) => 0,
            BandFilter::Fir(f) => f.group_delay_samples() as usize,
            BandFilter::FastFir(f) => (f.filter_length() - 1) / 2,
        }
    }
}

/// Filters for every band of a layout; unusable bands carry `None`
#[derive(Debug)]
pub struct FilterBank {
    filters: Vec<Option<BandFilter>>,
}

impl FilterBank {
    pub fn design(layout: &BandLayout, framing: &FramingParams) -> Self {
        let fs = layout.sample_rate as f64;
        let filters = layout
            .bands
            .iter()
            .map(|band| {
                if !band.usable {
                    return None;
                }
                let filter = match framing.filter {
                    FilterKind::Butterworth => BandFilter::Sos(design_butterworth_bandpass(
                        framing.butterworth_order,
                        band.lo,
                        band.hi,
                        fs,
                    )),
                    FilterKind::Fir => {
                        let h = design_bandpass_fir(
                            band.lo,
                            band.hi,
                            fs,
                            framing.fir_transition,
                            WindowType::Hamming,
                            framing.fir_max_taps,
                        );
                        if h.len() <= DIRECT_FIR_MAX_TAPS {
                            BandFilter::Fir(FirFilter::new(h))
                        } else {
                            BandFilter::FastFir(FastFirFilter::new(&h, FFT_BLOCK_SIZE))
                        }
                    }
                };
                Some(filter)
            })
            .collect();
        Self { filters }
    }

    pub fn get(&self, band: usize) -> Option<&BandFilter> {
        self.filters.get(band).and_then(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Cache key: everything the coefficients are a function of
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub sample_rate: u32,
    pub grid: BandGrid,
    pub bands_per_octave: u32,
    /// Center frequencies as raw bits, usable bands only
    pub centers: Vec<u64>,
    pub kind: FilterKind,
    /// Butterworth order or FIR tap ceiling
    pub order_or_taps: usize,
    pub transition_bits: u64,
}

impl FilterKey {
    pub fn new(layout: &BandLayout, framing: &FramingParams) -> Self {
        let (order_or_taps, transition_bits) = match framing.filter {
            FilterKind::Butterworth => (framing.butterworth_order, 0),
            FilterKind::Fir => (framing.fir_max_taps, framing.fir_transition.to_bits()),
        };
        Self {
            sample_rate: layout.sample_rate,
            grid: layout.grid,
            bands_per_octave: layout.bands_per_octave,
            centers: layout
                .bands
                .iter()
                .map(|b| if b.usable { b.center.to_bits() } else { 0 })
                .collect(),
            kind: framing.filter,
            order_or_taps,
            transition_bits,
        }
    }
}

/// Process-wide filter bank cache, injected into the framing engines
#[derive(Debug, Default)]
pub struct FilterBankCache {
    banks: Mutex<HashMap<FilterKey, Arc<FilterBank>>>,
}

impl FilterBankCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached bank for this layout/design, designing it on a miss.
    ///
    /// Design runs outside the lock; if two jobs race on the same key the first
    /// inserted bank wins and both receive it.
    pub fn get_or_design(&self, layout: &BandLayout, framing: &FramingParams) -> Arc<FilterBank> {
        let key = FilterKey::new(layout, framing);
        if let Some(bank) = self.lock().get(&key) {
            return Arc::clone(bank);
        }

        debug!(
            sample_rate = layout.sample_rate,
            bands = layout.len(),
            kind = ?framing.filter,
            "designing filter bank"
        );
        let designed = Arc::new(FilterBank::design(layout, framing));
        Arc::clone(self.lock().entry(key).or_insert(designed))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FilterKey, Arc<FilterBank>>> {
        // Coefficients are immutable once inserted, so a poisoned map is still valid
        self.banks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandParams;

    fn layout(fs: u32) -> BandLayout {
        BandLayout::new(
            &BandParams {
                fmin: 100.0,
                fmax: 8000.0,
                ..BandParams::default()
            },
            fs,
        )
    }

    #[test]
    fn cache_reuses_banks_per_key() {
        let cache = FilterBankCache::new();
        let framing = FramingParams::default();
        let a = cache.get_or_design(&layout(16_000), &framing);
        let b = cache.get_or_design(&layout(16_000), &framing);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        let c = cache.get_or_design(&layout(48_000), &framing);
        assert!(!Arc::ptr_eq(&a, &c));

        let fir = FramingParams {
            filter: FilterKind::Fir,
            ..FramingParams::default()
        };
        cache.get_or_design(&layout(16_000), &fir);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn unusable_bands_have_no_filter() {
        let l = layout(16_000);
        let bank = FilterBank::design(&l, &FramingParams::default());
        for (i, band) in l.bands.iter().enumerate() {
            assert_eq!(bank.get(i).is_some(), band.usable);
        }
    }
}
