//! Session TTL Calculation
//!
//! ```text
//! risk ──► strategy ──► off-hours reduction ──► clamp [min_ttl, base_ttl]
//! ```
//!
//! | strategy    | ttl                                                       |
//! |-------------|-----------------------------------------------------------|
//! | linear      | base × (1 − r)                                            |
//! | exponential | base × e^(−2r)                                            |
//! | logarithmic | base × (1 − log10(1 + 9r))                                |
//! | stepped     | 100% / 75% / 50% / 25% below 0.2 / 0.4 / 0.6 / 0.8, else min |
//! | adaptive    | base × max(e^(−1.5r) × (1 − 0.2·tod) × (1 − 0.3·threat), 0.1) |
//!
//! Outside business hours the result is cut by `0.2 + 0.3r`, floored at the
//! off-hours floor, before the final clamp.

use crate::config::TtlConfig;
use crate::EngineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ztgate_common::{clamp_risk, LocalClock};

const ADAPTIVE_FLOOR: f64 = 0.1;
const MORNING_SHOULDER: std::ops::Range<u32> = 6..9;
const EVENING_SHOULDER: std::ops::Range<u32> = 18..22;

/// How risk maps to session lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlStrategy {
    Linear,
    Exponential,
    Logarithmic,
    Stepped,
    #[default]
    Adaptive,
}

/// Session lifetime calculator
#[derive(Debug, Clone)]
pub struct TtlCalculator {
    base_secs: f64,
    min_secs: f64,
    off_hours_floor_secs: f64,
    clock: LocalClock,
}

impl TtlCalculator {
    /// Create from configuration
    pub fn new(config: &TtlConfig) -> EngineResult<Self> {
        Ok(Self {
            base_secs: config.base_ttl_secs as f64,
            min_secs: config.min_ttl_secs as f64,
            off_hours_floor_secs: config.off_hours_floor_secs as f64,
            clock: config.clock()?,
        })
    }

    /// Longest session
    pub fn base_ttl(&self) -> Duration {
        Duration::from_secs(self.base_secs as u64)
    }

    /// Shortest session
    pub fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.min_secs as u64)
    }

    /// Session lifetime for `risk` at `now`
    pub fn compute_ttl(
        &self,
        risk: f64,
        strategy: TtlStrategy,
        now: DateTime<Utc>,
        system_threat: f64,
    ) -> Duration {
        let risk = clamp_risk(risk);
        let mut secs = match strategy {
            TtlStrategy::Linear => self.base_secs * (1.0 - risk),
            TtlStrategy::Exponential => self.base_secs * (-2.0 * risk).exp(),
            TtlStrategy::Logarithmic => self.base_secs * (1.0 - (1.0 + 9.0 * risk).log10()),
            TtlStrategy::Stepped => match risk {
                r if r < 0.2 => self.base_secs,
                r if r < 0.4 => self.base_secs * 0.75,
                r if r < 0.6 => self.base_secs * 0.5,
                r if r < 0.8 => self.base_secs * 0.25,
                _ => self.min_secs,
            },
            TtlStrategy::Adaptive => {
                let multiplier = (-1.5 * risk).exp()
                    * (1.0 - 0.2 * self.time_of_day_factor(now))
                    * (1.0 - 0.3 * clamp_risk(system_threat));
                self.base_secs * multiplier.max(ADAPTIVE_FLOOR)
            }
        };

        if !self.clock.is_business_hours(now) {
            secs = (secs * (1.0 - (0.2 + 0.3 * risk))).max(self.off_hours_floor_secs);
        }

        self.clamp_secs(secs)
    }

    /// Clamp any lifetime into `[min_ttl, base_ttl]`
    pub fn clamp(&self, ttl: Duration) -> Duration {
        self.clamp_secs(ttl.as_secs_f64())
    }

    fn clamp_secs(&self, secs: f64) -> Duration {
        let secs = if secs.is_finite() { secs } else { self.min_secs };
        Duration::from_secs(secs.clamp(self.min_secs, self.base_secs).round() as u64)
    }

    /// 0 in business hours, 0.5 in the shoulders, 1 at night and weekends
    fn time_of_day_factor(&self, now: DateTime<Utc>) -> f64 {
        if self.clock.is_weekend(now) {
            return 1.0;
        }
        if self.clock.is_business_hours(now) {
            return 0.0;
        }
        let hour = self.clock.hour(now);
        if MORNING_SHOULDER.contains(&hour) || EVENING_SHOULDER.contains(&hour) {
            0.5
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const MIN: Duration = Duration::from_secs(5 * 60);
    const BASE: Duration = Duration::from_secs(30 * 60);

    fn calculator() -> TtlCalculator {
        TtlCalculator::new(&TtlConfig::default()).unwrap()
    }

    /// Wednesday 11:00 UTC
    fn business() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap()
    }

    /// Wednesday 23:30 UTC
    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 23, 30, 0).unwrap()
    }

    #[test]
    fn test_linear_zero_risk_is_full_ttl() {
        assert_eq!(calculator().compute_ttl(0.0, TtlStrategy::Linear, business(), 0.0), BASE);
    }

    #[test]
    fn test_stepped_half_risk() {
        let ttl = calculator();
        let stepped = ttl.compute_ttl(0.5, TtlStrategy::Stepped, business(), 0.0);
        assert_eq!(stepped, Duration::from_secs(15 * 60));

        // 15m cut by 35%, then clamped to the 5m minimum at most
        let off = ttl.compute_ttl(0.5, TtlStrategy::Stepped, night(), 0.0);
        assert!(off <= Duration::from_secs(15 * 60));
        assert!(off >= Duration::from_secs(3 * 60));
        assert_eq!(off, Duration::from_secs(585));
    }

    #[test]
    fn test_out_of_range_risk_is_clamped() {
        let ttl = calculator();
        assert_eq!(ttl.compute_ttl(1.5, TtlStrategy::Linear, business(), 0.0), MIN);
        assert_eq!(ttl.compute_ttl(-3.0, TtlStrategy::Linear, business(), 0.0), BASE);
        assert_eq!(ttl.compute_ttl(f64::NAN, TtlStrategy::Linear, business(), 0.0), MIN);
    }

    #[test]
    fn test_strategy_shapes() {
        let ttl = calculator();
        let at = business();
        assert_eq!(ttl.compute_ttl(1.0, TtlStrategy::Logarithmic, at, 0.0), MIN);
        assert_eq!(ttl.compute_ttl(0.0, TtlStrategy::Logarithmic, at, 0.0), BASE);
        assert_eq!(ttl.compute_ttl(0.9, TtlStrategy::Stepped, at, 0.0), MIN);
        // 1800 * e^-1
        let exponential = ttl.compute_ttl(0.5, TtlStrategy::Exponential, at, 0.0);
        assert_eq!(exponential, Duration::from_secs(662));
    }

    #[test]
    fn test_adaptive_reacts_to_time_and_threat() {
        let ttl = calculator();
        let calm = ttl.compute_ttl(0.2, TtlStrategy::Adaptive, business(), 0.0);
        let tense = ttl.compute_ttl(0.2, TtlStrategy::Adaptive, business(), 1.0);
        let late = ttl.compute_ttl(0.2, TtlStrategy::Adaptive, night(), 0.0);
        assert!(tense < calm);
        assert!(late < calm);
        // 1800 * e^-0.3
        assert_eq!(calm, Duration::from_secs(1333));
    }

    #[test]
    fn test_time_of_day_factor() {
        let ttl = calculator();
        assert_eq!(ttl.time_of_day_factor(business()), 0.0);
        let at = |day, hour| Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap();
        assert_eq!(ttl.time_of_day_factor(at(4, 7)), 0.5);
        assert_eq!(ttl.time_of_day_factor(at(4, 19)), 0.5);
        assert_eq!(ttl.time_of_day_factor(night()), 1.0);
        // Saturday noon
        assert_eq!(ttl.time_of_day_factor(at(7, 12)), 1.0);
    }

    #[test]
    fn test_offset_clock_changes_business_hours() {
        // UTC-05:00: 11:00 UTC is 06:00 local
        let config = TtlConfig {
            utc_offset_minutes: -300,
            ..TtlConfig::default()
        };
        let ttl = TtlCalculator::new(&config).unwrap();
        assert!(ttl.compute_ttl(0.0, TtlStrategy::Linear, business(), 0.0) < BASE);
    }

    #[test]
    fn test_clamp() {
        let ttl = calculator();
        assert_eq!(ttl.clamp(Duration::from_secs(10)), MIN);
        assert_eq!(ttl.clamp(Duration::from_secs(86_400)), BASE);
        assert_eq!(ttl.clamp(Duration::from_secs(600)), Duration::from_secs(600));
    }

    proptest! {
        #[test]
        fn prop_ttl_within_bounds(
            risk in proptest::num::f64::ANY,
            threat in proptest::num::f64::ANY,
            hour in 0u32..24,
            strategy in prop_oneof![
                Just(TtlStrategy::Linear),
                Just(TtlStrategy::Exponential),
                Just(TtlStrategy::Logarithmic),
                Just(TtlStrategy::Stepped),
                Just(TtlStrategy::Adaptive),
            ],
        ) {
            let at = Utc.with_ymd_and_hms(2026, 3, 4, hour, 0, 0).unwrap();
            let ttl = calculator().compute_ttl(risk, strategy, at, threat);
            prop_assert!(ttl >= MIN && ttl <= BASE);
        }
    }
}
