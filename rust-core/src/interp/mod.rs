//! Curve interpolation

pub mod pchip;

pub use pchip::Pchip;
