//! Local business-hours arithmetic
//!
//! Request timestamps are UTC. Business-hour checks run against the
//! deployment's local time, expressed as a fixed UTC offset.

use crate::{CommonError, CommonResult};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};

/// Longest span accepted anywhere, 100 years
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

/// Seconds as a chrono span, saturating at [`MAX_SPAN_SECS`]
pub fn span_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}

/// Converts UTC instants into local hour / weekday facts
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
    business_start: u32,
    business_end: u32,
}

impl LocalClock {
    /// Create a clock for `offset_minutes` east of UTC with business hours
    /// `[start_hour, end_hour)`.
    pub fn new(offset_minutes: i32, start_hour: u32, end_hour: u32) -> CommonResult<Self> {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| CommonError::InvalidField {
                field: "utc_offset_minutes",
                reason: format!("{offset_minutes} is outside ±24h"),
            })?;
        if start_hour >= end_hour || end_hour > 24 {
            return Err(CommonError::InvalidField {
                field: "business_hours",
                reason: format!("{start_hour}..{end_hour} is not a valid window"),
            });
        }
        Ok(Self {
            offset,
            business_start: start_hour,
            business_end: end_hour,
        })
    }

    /// UTC clock, business hours 09:00-18:00
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
            business_start: 9,
            business_end: 18,
        }
    }

    /// Local time for a UTC instant
    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    /// Local hour of day, 0-23
    pub fn hour(&self, at: DateTime<Utc>) -> u32 {
        self.local(at).hour()
    }

    /// Local minutes since midnight
    pub fn minute_of_day(&self, at: DateTime<Utc>) -> u32 {
        let local = self.local(at);
        local.hour() * 60 + local.minute()
    }

    /// Saturday or Sunday in local time
    pub fn is_weekend(&self, at: DateTime<Utc>) -> bool {
        matches!(self.local(at).weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Inside the business window on a weekday
    pub fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        let hour = self.hour(at);
        !self.is_weekend(at) && hour >= self.business_start && hour < self.business_end
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_business_hours_utc() {
        let clock = LocalClock::utc();
        // Wednesday
        let noon = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 4, 18, 0, 0).unwrap();
        assert!(clock.is_business_hours(noon));
        assert!(!clock.is_business_hours(late));
    }

    #[test]
    fn test_weekend_is_never_business_hours() {
        let clock = LocalClock::utc();
        let saturday_noon = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert!(clock.is_weekend(saturday_noon));
        assert!(!clock.is_business_hours(saturday_noon));
    }

    #[test]
    fn test_offset_shifts_local_hour() {
        // UTC+05:30
        let clock = LocalClock::new(330, 9, 18).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 2, 0, 0).unwrap();
        assert_eq!(clock.hour(at), 7);
        assert_eq!(clock.minute_of_day(at), 7 * 60 + 30);
        assert!(!clock.is_business_hours(at));
    }

    #[test]
    fn test_span_saturates() {
        assert_eq!(span_secs(90), chrono::Duration::seconds(90));
        assert_eq!(span_secs(u64::MAX), chrono::Duration::seconds(MAX_SPAN_SECS as i64));
    }

    #[test]
    fn test_invalid_window_rejected() {
        assert!(LocalClock::new(0, 18, 9).is_err());
        assert!(LocalClock::new(0, 9, 25).is_err());
        assert!(LocalClock::new(24 * 60, 9, 18).is_err());
    }

    #[test]
    fn test_extreme_offsets_rejected() {
        assert!(matches!(
            LocalClock::new(i32::MAX, 9, 18),
            Err(CommonError::InvalidField { field: "utc_offset_minutes", .. })
        ));
        assert!(LocalClock::new(i32::MIN, 9, 18).is_err());
        assert!(LocalClock::new(-(24 * 60 - 1), 9, 18).is_ok());
    }
}
