/// Lowest level reported for silence, in dB.
pub const DB_FLOOR: f32 = -192.0;

/// 10 * log10(2), scales a base-2 logarithm of a power into decibels.
pub const DB_PER_LOG2_POWER: f32 = 3.010_299_956_639_812;

/// Approximate `log2(value)` for positive, finite `value`.
///
/// Splits off the IEEE-754 exponent and evaluates a degree 6 polynomial over
/// the mantissa. The absolute error stays below 3.8e-6 and powers of two are
/// exact.
#[inline]
pub fn fast_log2(value: f32) -> f32 {
    let bits = value.to_bits();
    let exponent = ((bits >> 23) & 0xff) as i32 - 127;
    let mantissa = f32::from_bits((bits & 0x007f_ffff) | (127 << 23));
    let x = mantissa - 1.0;
    let mut r = x * -0.025_936_699_354_470_92;
    r = x * (0.122_047_857_676_447_18 + r);
    r = x * (-0.278_142_976_850_643_3 + r);
    r = x * (0.457_647_123_003_200_9 + r);
    r = x * (-0.718_161_056_646_240_2 + r);
    r = x * (1.442_545_402_587_825_2 + r);
    exponent as f32 + r
}

/// Level in dB of a squared amplitude, clamped at [`DB_FLOOR`].
#[inline]
pub fn db_from_square(square: f32) -> f32 {
    if square <= 0.0 || !square.is_finite() {
        return DB_FLOOR;
    }
    (DB_PER_LOG2_POWER * fast_log2(square)).max(DB_FLOOR)
}

/// Peak level of `samples` in dB, [`DB_FLOOR`] for an all-zero block.
pub fn peak_db(samples: &[f32]) -> f32 {
    let max_square = samples.iter().fold(0.0_f32, |acc, s| acc.max(s * s));
    db_from_square(max_square)
}

/// Mean power of `samples` in dB, [`DB_FLOOR`] for an empty or silent block.
pub fn average_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return DB_FLOOR;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    db_from_square(sum / samples.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_log2_exact_at_powers_of_two() {
        for e in -20..20 {
            let v = 2.0_f32.powi(e);
            assert_eq!(fast_log2(v), e as f32, "2^{e}");
        }
    }

    #[test]
    fn test_fast_log2_error_bound() {
        let mut v = 0.001_f32;
        while v < 1000.0 {
            let err = (fast_log2(v) - v.log2()).abs();
            assert!(err < 6e-6, "value {v} error {err}");
            v *= 1.037;
        }
    }

    #[test]
    fn test_peak_db() {
        assert_eq!(peak_db(&[0.0; 16]), DB_FLOOR);
        let half = peak_db(&[0.1, -0.5, 0.25]);
        assert!((half - 20.0 * 0.5_f32.log10()).abs() < 1e-4);
        assert!(peak_db(&[1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_average_db() {
        assert_eq!(average_db(&[]), DB_FLOOR);
        let level = average_db(&[0.5, -0.5, 0.5, -0.5]);
        assert!((level - 20.0 * 0.5_f32.log10()).abs() < 1e-4);
    }
}
