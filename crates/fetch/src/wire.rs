//! Upstream JSON payloads.

use serde::{Deserialize, Serialize};

use airtime_core::WeeklySchedule;
use airtime_schedule::{validate, ScheduleError};

/// Body of `GET /entity/{id}`.
///
/// Broadcast fields are optional on the wire; entities no longer airing come
/// back without them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamEntity {
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub broadcast_day: Option<String>,
    #[serde(default)]
    pub broadcast_time: Option<String>,
    #[serde(default)]
    pub broadcast_timezone: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl UpstreamEntity {
    /// Build a validated weekly schedule from the broadcast fields.
    ///
    /// Missing fields fail validation the same way malformed ones do, so an
    /// entity without a usable broadcast slot can never be registered.
    pub fn weekly_schedule(&self) -> Result<WeeklySchedule, ScheduleError> {
        let schedule = WeeklySchedule {
            day: self.broadcast_day.clone().unwrap_or_default(),
            time: self.broadcast_time.clone().unwrap_or_default(),
            timezone: self.broadcast_timezone.clone().unwrap_or_default(),
        };
        validate(&schedule)?;
        Ok(schedule)
    }
}

/// Error body carried by non-2xx upstream responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
