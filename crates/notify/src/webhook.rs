//! HTTP webhook notifier.
//!
//! Delivers each notification as a JSON POST carrying the recipient id next
//! to the payload fields. The receiving end owns the actual user-facing
//! transport (chat message, push, mail).

use std::time::Duration;

use airtime_core::config::NotifyConfig;
use airtime_core::RecipientId;

use crate::traits::{Notifier, NotifyError, OccurrencePayload};

#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    recipient: &'a str,
    #[serde(flatten)]
    payload: &'a OccurrencePayload,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(NotifyError::Config("webhook URL is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn from_config(cfg: &NotifyConfig) -> Result<Self, NotifyError> {
        let url = cfg
            .webhook_url
            .clone()
            .ok_or_else(|| NotifyError::Config("AIRTIME_WEBHOOK_URL is not set".to_string()))?;
        Self::new(url, Duration::from_secs(cfg.request_timeout_secs))
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(
        &self,
        recipient: &RecipientId,
        payload: &OccurrencePayload,
    ) -> Result<(), NotifyError> {
        let body = WebhookBody {
            recipient,
            payload,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                recipient = %recipient,
                %status,
                body = %message,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Delivery {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(
            recipient = %recipient,
            entity_id = payload.entity_id,
            %status,
            "webhook notification delivered"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
