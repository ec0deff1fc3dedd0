//! Delivers one payload to every subscriber of an entity.
//!
//! Each recipient is sent to independently; a failure for one recipient
//! never blocks delivery to the others. Callers get per-recipient outcomes
//! and decide what a partially failed cycle means.

use std::sync::Arc;
use std::time::Instant;

use airtime_core::RecipientId;

use crate::traits::{DeliveryOutcome, Notifier, OccurrencePayload};

pub struct Fanout {
    notifier: Arc<dyn Notifier>,
}

impl Fanout {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Deliver `payload` to every recipient, collecting one outcome each.
    pub async fn deliver(
        &self,
        recipients: &[RecipientId],
        payload: &OccurrencePayload,
    ) -> Vec<DeliveryOutcome> {
        if recipients.is_empty() {
            tracing::debug!(entity_id = payload.entity_id, "no subscribers to notify");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let start = Instant::now();
            let result = self.notifier.send(recipient, payload).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        entity_id = payload.entity_id,
                        recipient = %recipient,
                        channel = self.notifier.channel_name(),
                        duration_ms,
                        "notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        entity_id = payload.entity_id,
                        recipient = %recipient,
                        channel = self.notifier.channel_name(),
                        error = %e,
                        duration_ms,
                        "notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DeliveryOutcome {
                recipient: recipient.clone(),
                success,
                error,
                duration_ms,
            });
        }

        results
    }
}
