//! Sound-level-meter reference files
//!
//! Meters export free text; the one line we need looks like
//! `LAeq , T = 52.4 dB`. Spacing, case and the trailing unit vary.

use crate::error::{CalibError, Result};
use encoding_rs::{Encoding, WINDOWS_1252};
use std::borrow::Cow;
use std::path::Path;

/// Decode meter text: BOM-tagged UTF-8/UTF-16, plain UTF-8, else Windows-1252
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Find the first `LAeq , T = <number>` value in `text`
pub fn parse_laeq(text: &str) -> Option<f64> {
    text.lines().find_map(parse_line)
}

fn parse_line(line: &str) -> Option<f64> {
    let lower = line.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find("laeq") {
        let after = search_from + pos + 4;
        if let Some(value) = parse_after_key(&line[after..]) {
            return Some(value);
        }
        search_from = after;
    }
    None
}

fn parse_after_key(rest: &str) -> Option<f64> {
    let rest = rest.trim_start().strip_prefix(',')?.trim_start();
    let rest = rest.strip_prefix(['T', 't'])?.trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();

    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read and parse a reference file; any failure is a structural error
pub fn read_reference(path: &Path) -> Result<f64> {
    let bytes = std::fs::read(path)?;
    parse_laeq(&decode_text(&bytes)).ok_or_else(|| CalibError::Reference(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meter_export() {
        let text = "Device: XL2\nStart 12:00:01\nLAeq , T = 52.4 dB\nLAFmax = 60.1\n";
        assert_eq!(parse_laeq(text), Some(52.4));
    }

    #[test]
    fn tolerates_spacing_and_case() {
        assert_eq!(parse_laeq("laeq,t=31"), Some(31.0));
        assert_eq!(parse_laeq("  LAeq   ,   T =   -3.5dB"), Some(-3.5));
        assert_eq!(parse_laeq("LAeq_dt , T = 40\nLAeq , T = 41.0"), Some(41.0));
    }

    #[test]
    fn missing_value_is_none() {
        assert_eq!(parse_laeq("LAeq = 40"), None);
        assert_eq!(parse_laeq("LAeq , T = dB"), None);
        assert_eq!(parse_laeq(""), None);
    }

    #[test]
    fn decodes_utf16_and_latin() {
        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "LAeq , T = 44.0".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(parse_laeq(&decode_text(&utf16)), Some(44.0));

        // 0xB0 is a degree sign in Windows-1252 and invalid as UTF-8
        let latin = b"Temp 21\xB0C\nLAeq , T = 38.2";
        let text = decode_text(latin);
        assert!(text.contains('°'));
        assert_eq!(parse_laeq(&text), Some(38.2));
    }
}
