//! Next/previous occurrence math on resolved schedules.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};

use airtime_core::WeeklySchedule;

use crate::error::ScheduleError;
use crate::resolve::ResolvedSchedule;

/// Earliest instant strictly after `reference` matching the schedule's
/// weekday and wall-clock time in its zone.
pub fn next_occurrence(
    schedule: &WeeklySchedule,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    Ok(ResolvedSchedule::parse(schedule)?.next_from(reference))
}

/// Latest instant at or before `reference` matching the schedule.
pub fn previous_occurrence(
    schedule: &WeeklySchedule,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    Ok(ResolvedSchedule::parse(schedule)?.previous_from(reference))
}

impl ResolvedSchedule {
    /// Walk forward from `reference` to the next occurrence.
    ///
    /// The reference is converted into the schedule's zone first, so the
    /// day-offset arithmetic happens on local wall-clock values and stays
    /// correct across daylight-saving shifts. When the target weekday is
    /// today but the slot has already passed, the result moves a full week
    /// out; the returned instant is always strictly in the future.
    pub fn next_from(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        let local = reference.with_timezone(&self.tz);
        let days_ahead = (i64::from(self.weekday.num_days_from_monday())
            - i64::from(local.weekday().num_days_from_monday()))
        .rem_euclid(7);

        let candidate = self.localize(
            (local.date_naive() + Duration::days(days_ahead)).and_time(self.time),
        );
        if candidate <= reference {
            // Today's slot already passed; roll a full week forward.
            return self.localize(
                (local.date_naive() + Duration::days(days_ahead + 7)).and_time(self.time),
            );
        }
        candidate
    }

    /// Walk backward from `reference` to the most recent occurrence (which
    /// may be `reference` itself when it lands exactly on the slot).
    pub fn previous_from(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        let local = reference.with_timezone(&self.tz);
        let days_back = (i64::from(local.weekday().num_days_from_monday())
            - i64::from(self.weekday.num_days_from_monday()))
        .rem_euclid(7);

        let candidate = self.localize(
            (local.date_naive() - Duration::days(days_back)).and_time(self.time),
        );
        if candidate > reference {
            return self.localize(
                (local.date_naive() - Duration::days(days_back + 7)).and_time(self.time),
            );
        }
        candidate
    }

    /// Map a local wall-clock value into an instant.
    ///
    /// Ambiguous times (clocks rolled back) take the earlier mapping.
    /// Nonexistent times (clocks sprang forward) probe ahead in half-hour
    /// steps until the zone maps them again.
    fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        if let Some(dt) = self.tz.from_local_datetime(&naive).earliest() {
            return dt.with_timezone(&Utc);
        }
        let mut probe = naive;
        for _ in 0..8 {
            probe += Duration::minutes(30);
            if let Some(dt) = self.tz.from_local_datetime(&probe).earliest() {
                return dt.with_timezone(&Utc);
            }
        }
        DateTime::from_naive_utc_and_offset(naive, Utc)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::{America, Asia, Tz};

    use super::*;

    fn sched(day: &str, time: &str, tz: &str) -> WeeklySchedule {
        WeeklySchedule {
            day: day.to_string(),
            time: time.to_string(),
            timezone: tz.to_string(),
        }
    }

    fn at(tz: Tz, y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, m, d, hh, mm, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    // -- next_occurrence ---------------------------------------------------

    #[test]
    fn one_minute_before_slot_fires_same_day() {
        // 2025-01-15 is a Wednesday.
        let reference = at(Asia::Tokyo, 2025, 1, 15, 17, 59);
        let next = next_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(next, at(Asia::Tokyo, 2025, 1, 15, 18, 0));
    }

    #[test]
    fn one_minute_after_slot_rolls_a_week() {
        let reference = at(Asia::Tokyo, 2025, 1, 15, 18, 1);
        let next = next_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(next, at(Asia::Tokyo, 2025, 1, 22, 18, 0));
    }

    #[test]
    fn exact_slot_instant_rolls_a_week() {
        let reference = at(Asia::Tokyo, 2025, 1, 15, 18, 0);
        let next = next_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(next, at(Asia::Tokyo, 2025, 1, 22, 18, 0));
    }

    #[test]
    fn target_earlier_in_week_wraps_forward() {
        // Reference is a Friday; Monday comes three days later.
        let reference = at(Asia::Tokyo, 2025, 1, 17, 12, 0);
        let next = next_occurrence(&sched("Monday", "09:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(next, at(Asia::Tokyo, 2025, 1, 20, 9, 0));
    }

    #[test]
    fn crosses_month_and_year_boundary() {
        // 2024-12-31 is a Tuesday.
        let reference = at(Asia::Tokyo, 2024, 12, 31, 23, 0);
        let next = next_occurrence(&sched("Wednesday", "10:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(next, at(Asia::Tokyo, 2025, 1, 1, 10, 0));
    }

    #[test]
    fn keeps_local_wall_clock_across_spring_forward() {
        // US DST starts 2025-03-09; the Sundays around it are 167h apart.
        let reference = at(America::New_York, 2025, 3, 1, 12, 0);
        let s = sched("Sunday", "20:00", "America/New_York");

        let first = next_occurrence(&s, reference).unwrap();
        let second = next_occurrence(&s, first).unwrap();

        assert_eq!(first, at(America::New_York, 2025, 3, 2, 20, 0));
        assert_eq!(second, at(America::New_York, 2025, 3, 9, 20, 0));
        assert_eq!(second - first, Duration::hours(167));
        assert_eq!(first.with_timezone(&America::New_York).format("%H:%M").to_string(), "20:00");
        assert_eq!(second.with_timezone(&America::New_York).format("%H:%M").to_string(), "20:00");
    }

    #[test]
    fn nonexistent_wall_clock_shifts_past_the_gap() {
        // 02:30 does not exist on 2025-03-09 in New York; the slot lands on
        // the first mapped wall clock after the gap.
        let reference = at(America::New_York, 2025, 3, 8, 12, 0);
        let next =
            next_occurrence(&sched("Sunday", "02:30", "America/New_York"), reference).unwrap();
        let local = next.with_timezone(&America::New_York);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2025-03-09 03:00");
    }

    #[test]
    fn ambiguous_wall_clock_takes_earlier_mapping() {
        // 01:30 happens twice on 2025-11-02 in New York; EDT (UTC-4) wins.
        let reference = at(America::New_York, 2025, 11, 1, 12, 0);
        let next =
            next_occurrence(&sched("Sunday", "01:30", "America/New_York"), reference).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 11, 2, 5, 30, 0).unwrap());
    }

    #[test]
    fn invalid_fields_surface_typed_errors() {
        let reference = Utc::now();
        assert!(matches!(
            next_occurrence(&sched("Blursday", "18:00", "Asia/Tokyo"), reference),
            Err(ScheduleError::InvalidWeekday(_))
        ));
        assert!(matches!(
            next_occurrence(&sched("Wednesday", "18:99", "Asia/Tokyo"), reference),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(matches!(
            next_occurrence(&sched("Wednesday", "18:00", "Asia/Tokio"), reference),
            Err(ScheduleError::InvalidTimezone(_))
        ));
    }

    // -- previous_occurrence -----------------------------------------------

    #[test]
    fn previous_right_after_slot_is_same_day() {
        let reference = at(Asia::Tokyo, 2025, 1, 15, 18, 1);
        let prev =
            previous_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(prev, at(Asia::Tokyo, 2025, 1, 15, 18, 0));
    }

    #[test]
    fn previous_right_before_slot_is_last_week() {
        let reference = at(Asia::Tokyo, 2025, 1, 15, 17, 59);
        let prev =
            previous_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), reference).unwrap();
        assert_eq!(prev, at(Asia::Tokyo, 2025, 1, 8, 18, 0));
    }

    #[test]
    fn previous_includes_the_exact_instant() {
        let slot = at(Asia::Tokyo, 2025, 1, 15, 18, 0);
        let prev = previous_occurrence(&sched("Wednesday", "18:00", "Asia/Tokyo"), slot).unwrap();
        assert_eq!(prev, slot);
    }

    #[test]
    fn previous_of_next_is_the_next_itself() {
        let s = sched("Friday", "23:30", "America/New_York");
        let reference = at(America::New_York, 2025, 6, 10, 8, 0);
        let next = next_occurrence(&s, reference).unwrap();
        assert_eq!(previous_occurrence(&s, next).unwrap(), next);
    }

    #[test]
    fn next_and_previous_straddle_the_reference() {
        let s = sched("Tuesday", "06:15", "Europe/Berlin");
        let reference = at(Asia::Tokyo, 2025, 4, 3, 21, 40);
        let next = next_occurrence(&s, reference).unwrap();
        let prev = previous_occurrence(&s, reference).unwrap();
        assert!(prev <= reference && reference < next);
        assert_eq!(next - prev, Duration::days(7));
    }
}
