//! Calendar days in the quota reference timezone.

use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

/// Maps instants to quota days and computes when a day's counters expire.
#[derive(Debug, Clone, Copy)]
pub struct QuotaCalendar {
    offset: FixedOffset,
}

impl Default for QuotaCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl QuotaCalendar {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn with_offset_minutes(minutes: i32) -> ServiceResult<Self> {
        let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            ServiceError::Config(format!("UTC offset of {minutes} minutes is out of range"))
        })?;
        Ok(Self { offset })
    }

    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.day_of(Utc::now())
    }

    /// First instant of the day after `day`.
    pub fn rollover_after(&self, day: NaiveDate) -> DateTime<Utc> {
        let next = day.succ_opt().unwrap_or(NaiveDate::MAX);
        let local_midnight = next.and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc_midnight)
    }

    /// Seconds from `now` until counters for `day` expire, never below one.
    pub fn seconds_until_rollover(&self, day: NaiveDate, now: DateTime<Utc>) -> i64 {
        (self.rollover_after(day) - now).num_seconds().max(1)
    }
}
