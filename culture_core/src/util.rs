//! Small numeric and time helpers shared by the control laws.

/// Minutes in one hour.
pub const MINUTES_PER_HOUR: f64 = 60.0;
/// Seconds in one hour.
pub const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Round to the nearest hundredth, the resolution pump durations are sent at.
#[inline]
pub fn round_centi(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// True once at least `wait_min` minutes separate `last_h` and `now_h`.
#[inline]
pub fn waited(now_h: f64, last_h: f64, wait_min: f64) -> bool {
    (now_h - last_h) * MINUTES_PER_HOUR >= wait_min
}

/// Clamp `x` into `[lo, hi]`, reporting whether the bound was hit.
#[inline]
pub fn clamp_flag(x: f64, lo: f64, hi: f64) -> (f64, bool) {
    if x < lo {
        (lo, true)
    } else if x > hi {
        (hi, true)
    } else {
        (x, false)
    }
}

/// Volume fraction left after mixing `added_ml` into `volume_ml` and
/// draining back to `volume_ml`.
#[inline]
pub fn dilution_factor(volume_ml: f64, added_ml: f64) -> f64 {
    volume_ml / (added_ml + volume_ml)
}

/// Tick period as a `Duration`, at least one millisecond.
#[inline]
pub fn tick_period(tick_s: u64) -> std::time::Duration {
    std::time::Duration::from_secs(tick_s).max(std::time::Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(12.344, 12.34)]
    #[case(12.345_1, 12.35)]
    #[case(0.0, 0.0)]
    fn rounds_to_hundredths(#[case] x: f64, #[case] want: f64) {
        assert!((round_centi(x) - want).abs() < 1e-9);
    }

    #[rstest]
    #[case(1.0, 0.95, 3.0, true)]
    #[case(1.0, 0.96, 3.0, false)]
    #[case(0.0, 0.0, 0.0, true)]
    fn wait_in_minutes(#[case] now: f64, #[case] last: f64, #[case] wait: f64, #[case] ok: bool) {
        assert_eq!(waited(now, last, wait), ok);
    }

    #[test]
    fn dilution_of_equal_volumes_halves() {
        assert!((dilution_factor(10.0, 10.0) - 0.5).abs() < 1e-12);
    }
}
