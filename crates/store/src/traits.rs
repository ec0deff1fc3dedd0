use async_trait::async_trait;
use chrono::{DateTime, Utc};

use airtime_core::{EntityId, TrackedItem};

use crate::error::StoreError;

/// Document-store surface the scheduling engine consumes.
///
/// Single-document semantics, no transactions: every operation touches one
/// item (or the whole listing) and either fully happens or fully fails.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_tracked_item(&self, id: EntityId) -> Result<Option<TrackedItem>, StoreError>;

    async fn list_all_tracked_items(&self) -> Result<Vec<TrackedItem>, StoreError>;

    /// Set `last_fired_at`. Returns `false` when the item no longer exists.
    async fn update_last_fired(
        &self,
        id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when the item was already gone.
    async fn remove_tracked_item(&self, id: EntityId) -> Result<bool, StoreError>;
}
