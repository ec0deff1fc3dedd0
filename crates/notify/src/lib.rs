//! Notification delivery for occurrence fires.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable per-recipient transports
//! - Webhook notifier implementation
//! - Fan-out that delivers to every subscriber independently

pub mod fanout;
pub mod traits;
pub mod webhook;

pub use fanout::Fanout;
pub use traits::{DeliveryOutcome, Notifier, NotifyError, OccurrencePayload};
pub use webhook::WebhookNotifier;
