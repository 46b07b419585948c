//! Unit-interval score helpers

/// Clamp into `[0, 1]`, mapping non-finite values to `fallback`
#[inline]
pub fn unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Clamp a risk-like score. NaN is treated as maximum risk.
#[inline]
pub fn clamp_risk(value: f64) -> f64 {
    unit(value, 1.0)
}

/// Clamp a trust-like score. NaN is treated as zero trust.
#[inline]
pub fn clamp_trust(value: f64) -> f64 {
    unit(value, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_non_finite_fails_closed() {
        assert_eq!(clamp_risk(f64::NAN), 1.0);
        assert_eq!(clamp_trust(f64::NAN), 0.0);
        assert_eq!(clamp_risk(f64::INFINITY), 1.0);
        assert_eq!(clamp_trust(f64::NEG_INFINITY), 0.0);
    }

    proptest! {
        #[test]
        fn prop_unit_stays_in_range(v in proptest::num::f64::ANY) {
            let r = clamp_risk(v);
            let t = clamp_trust(v);
            prop_assert!((0.0..=1.0).contains(&r));
            prop_assert!((0.0..=1.0).contains(&t));
        }
    }
}
