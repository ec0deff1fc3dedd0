use thiserror::Error;

/// Why a stored schedule cannot be turned into fire instants.
///
/// Any of these means the entity must be suspended, never scheduled under a
/// guessed default.
#[derive(Error, Debug, Clone)]
pub enum ScheduleError {
    #[error("unrecognized weekday: {0:?}")]
    InvalidWeekday(String),

    #[error("malformed time (expected 24-hour HH:MM): {0:?}")]
    InvalidTime(String),

    #[error("unknown timezone: {0:?}")]
    InvalidTimezone(String),
}
