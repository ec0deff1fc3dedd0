use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream identifier of a tracked entity.
pub type EntityId = u64;

/// Opaque identifier of a notification recipient.
pub type RecipientId = String;

/// Weekly broadcast slot as stored: all three fields are kept verbatim from
/// the upstream payload and validated only when the entity is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySchedule {
    /// English weekday name (e.g. "Wednesday").
    pub day: String,
    /// 24-hour wall-clock time, "HH:MM".
    pub time: String,
    /// IANA zone identifier (e.g. "Asia/Tokyo").
    pub timezone: String,
}

impl std::fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.day, self.time, self.timezone)
    }
}

/// A weekly recurring entity with its subscriber set.
///
/// Owned by storage; the scheduling engine only ever works on a copy read at
/// the start of a fire cycle and writes back nothing except `last_fired_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub id: EntityId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub schedule: WeeklySchedule,
    /// Instant of the last successful notification cycle, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscribers: Vec<RecipientId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_item_round_trips_camel_case() {
        let item = TrackedItem {
            id: 5114,
            title: "Signal Nine".to_string(),
            image_url: Some("https://img.example/5114.jpg".to_string()),
            schedule: WeeklySchedule {
                day: "Wednesday".to_string(),
                time: "18:00".to_string(),
                timezone: "Asia/Tokyo".to_string(),
            },
            last_fired_at: None,
            subscribers: vec!["u1".to_string(), "u2".to_string()],
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["imageUrl"], "https://img.example/5114.jpg");
        assert_eq!(json["schedule"]["timezone"], "Asia/Tokyo");
        assert!(json.get("lastFiredAt").is_none());

        let back: TrackedItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, 5114);
        assert_eq!(back.subscribers.len(), 2);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "id": 1,
            "title": "Late Shift",
            "schedule": { "day": "Friday", "time": "23:30", "timezone": "America/New_York" }
        }"#;
        let item: TrackedItem = serde_json::from_str(json).unwrap();
        assert!(item.image_url.is_none());
        assert!(item.last_fired_at.is_none());
        assert!(item.subscribers.is_empty());
    }
}
