//! Band filter design and offline filtering

pub mod windows;
pub mod design;
pub mod sos;
pub mod fir;
pub mod fast_fir;
pub mod cache;

pub use windows::{WindowType, generate_window};
pub use design::{design_bandpass_fir, design_butterworth_bandpass, design_butterworth_highpass};
pub use sos::{Biquad, SosFilter};
pub use fir::FirFilter;
pub use fast_fir::FastFirFilter;
pub use cache::{BandFilter, FilterBank, FilterBankCache};
