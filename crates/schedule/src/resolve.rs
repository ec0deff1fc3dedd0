//! Parsing stored schedule strings into typed values.

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;

use airtime_core::WeeklySchedule;

use crate::error::ScheduleError;

/// A [`WeeklySchedule`] with all three fields parsed and known valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
    pub tz: Tz,
}

impl ResolvedSchedule {
    /// Parse a stored schedule, failing on the first invalid field.
    ///
    /// Weekday accepts English names, full or three-letter, any case
    /// ("Wednesday", "wed"). Time must be 24-hour `HH:MM`. Timezone must be
    /// an IANA identifier.
    pub fn parse(schedule: &WeeklySchedule) -> Result<Self, ScheduleError> {
        let weekday: Weekday = schedule
            .day
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidWeekday(schedule.day.clone()))?;

        let time = NaiveTime::parse_from_str(schedule.time.trim(), "%H:%M")
            .map_err(|_| ScheduleError::InvalidTime(schedule.time.clone()))?;

        let tz: Tz = schedule
            .timezone
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(schedule.timezone.clone()))?;

        Ok(Self { weekday, time, tz })
    }
}

/// Check that a stored schedule is usable without computing anything.
pub fn validate(schedule: &WeeklySchedule) -> Result<(), ScheduleError> {
    ResolvedSchedule::parse(schedule).map(|_| ())
}
