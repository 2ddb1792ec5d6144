//! SHA-256 helpers for content addressing

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Lowercase hex encoding of a SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
