//! Weekly occurrence math for broadcast schedules.
//!
//! Everything here is pure: parsing a stored [`WeeklySchedule`](airtime_core::WeeklySchedule)
//! into a [`ResolvedSchedule`] and walking it forward or backward from a
//! reference instant. Zone conversion goes through the IANA database, so
//! results stay correct across daylight-saving transitions.

pub mod error;
pub mod occurrence;
pub mod resolve;

pub use error::ScheduleError;
pub use occurrence::{next_occurrence, previous_occurrence};
pub use resolve::{validate, ResolvedSchedule};
