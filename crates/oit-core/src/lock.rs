//! Schedule Lock Guard
//!
//! Data may only be entered on the calendar day the visit is scheduled for.
//! The lock is a pure function of the scheduled date, the current instant and
//! the site offset; it is never stored.

use crate::data_model::{ScheduledDate, Visit};
use crate::environment::Environment;
use crate::error::OitError;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VisitLock {
    Open,
    Locked { scheduled: NaiveDate, today: NaiveDate },
}

impl VisitLock {
    pub fn evaluate(scheduled: &ScheduledDate, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let scheduled = match scheduled {
            ScheduledDate::Day(day) => *day,
            ScheduledDate::Instant(instant) => calendar_day(*instant, offset),
        };
        let today = calendar_day(now, offset);

        if scheduled == today {
            Self::Open
        } else {
            Self::Locked { scheduled, today }
        }
    }

    pub fn for_visit(visit: &Visit, env: &Environment) -> Self {
        Self::evaluate(&visit.scheduled_date, env.now(), env.site_offset)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    pub fn ensure_open(&self, visit_id: &str) -> Result<(), OitError> {
        match *self {
            Self::Open => Ok(()),
            Self::Locked { scheduled, today } => Err(OitError::VisitLocked {
                visit_id: visit_id.to_string(),
                scheduled,
                today,
            }),
        }
    }
}

pub fn calendar_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_same_day_is_open() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap();
        let lock = VisitLock::evaluate(&ScheduledDate::Day(day(2026, 10, 18)), now, brt());
        assert_eq!(lock, VisitLock::Open);
    }

    #[test]
    fn test_yesterday_is_locked() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap();
        let lock = VisitLock::evaluate(&ScheduledDate::Day(day(2026, 10, 17)), now, brt());
        assert_eq!(
            lock,
            VisitLock::Locked { scheduled: day(2026, 10, 17), today: day(2026, 10, 18) }
        );
        assert!(lock.ensure_open("oit-1").is_err());
    }

    #[test]
    fn test_site_offset_decides_the_day() {
        // 01:30 UTC on the 19th is still the 18th at UTC-3
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 1, 30, 0).unwrap();
        let scheduled = ScheduledDate::Day(day(2026, 10, 18));
        assert!(!VisitLock::evaluate(&scheduled, now, brt()).is_locked());
        assert!(VisitLock::evaluate(&scheduled, now, FixedOffset::east_opt(0).unwrap()).is_locked());
    }

    #[test]
    fn test_instant_schedule_uses_site_day() {
        let scheduled = ScheduledDate::Instant(Utc.with_ymd_and_hms(2026, 10, 18, 23, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        assert!(!VisitLock::evaluate(&scheduled, now, brt()).is_locked());
        assert!(VisitLock::evaluate(&scheduled, now + Duration::days(1), brt()).is_locked());
    }

    #[test]
    fn test_lock_is_idempotent() {
        let scheduled = ScheduledDate::Day(day(2026, 10, 17));
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap();
        let first = VisitLock::evaluate(&scheduled, now, brt());
        let second = VisitLock::evaluate(&scheduled, now, brt());
        assert_eq!(first, second);
    }
}
