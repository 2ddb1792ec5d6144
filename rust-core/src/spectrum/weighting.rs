//! A-weighting (IEC 61672-1 analytic form)

const F1: f64 = 20.598_997;
const F2: f64 = 107.652_65;
const F3: f64 = 737.862_23;
const F4: f64 = 12_194.217;

/// Normalisation so the curve reads 0 dB at 1 kHz
const A1000_DB: f64 = 2.0;

/// A-weighting in dB at `freq_hz`; `-inf` at DC
pub fn a_weighting_db(freq_hz: f64) -> f64 {
    let f2 = freq_hz * freq_hz;
    let num = F4 * F4 * f2 * f2;
    let den = (f2 + F1 * F1) * ((f2 + F2 * F2) * (f2 + F3 * F3)).sqrt() * (f2 + F4 * F4);
    20.0 * (num / den).log10() + A1000_DB
}

/// Linear power gain 10^(A/10)
pub fn a_weighting_power_gain(freq_hz: f64) -> f64 {
    if freq_hz <= 0.0 {
        return 0.0;
    }
    10f64.powf(a_weighting_db(freq_hz) / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_at_1khz() {
        assert!(a_weighting_db(1000.0).abs() < 0.01);
        assert!((a_weighting_power_gain(1000.0) - 1.0).abs() < 0.003);
    }

    #[test]
    fn matches_tabulated_values() {
        // IEC 61672-1 nominal values
        let table = [
            (31.5, -39.4),
            (100.0, -19.1),
            (250.0, -8.6),
            (4000.0, 1.0),
            (10_000.0, -2.5),
        ];
        for (f, expected) in table {
            let a = a_weighting_db(f);
            assert!((a - expected).abs() < 0.1, "{f} Hz: {a} vs {expected}");
        }
    }

    #[test]
    fn zero_gain_at_dc() {
        assert_eq!(a_weighting_power_gain(0.0), 0.0);
    }
}
