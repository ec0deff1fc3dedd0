//! Notifier trait definition and shared error types.

use chrono::{DateTime, Utc};

use airtime_core::{EntityId, RecipientId, TrackedItem};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery rejected ({status}): {message}")]
    Delivery { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// A rendered occurrence notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrencePayload {
    pub entity_id: EntityId,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// The occurrence instant this fire accounts for.
    pub occurrence: DateTime<Utc>,
}

impl OccurrencePayload {
    pub fn for_item(item: &TrackedItem, occurrence: DateTime<Utc>) -> Self {
        Self {
            entity_id: item.id,
            title: item.title.clone(),
            body: format!("{} is airing now", item.title),
            image_url: item.image_url.clone(),
            occurrence,
        }
    }
}

/// Trait for per-recipient notification transports.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a payload to a single recipient.
    async fn send(&self, recipient: &RecipientId, payload: &OccurrencePayload)
        -> Result<(), NotifyError>;

    /// Test connectivity with a sample payload.
    async fn test(&self, recipient: &RecipientId) -> Result<(), NotifyError> {
        let payload = OccurrencePayload {
            entity_id: 0,
            title: "Connectivity check".to_string(),
            body: "This is a test notification.".to_string(),
            image_url: None,
            occurrence: Utc::now(),
        };
        self.send(recipient, &payload).await
    }

    /// Human-readable name for this transport (e.g., "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of delivering a payload to a single recipient.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub recipient: RecipientId,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
