use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use airtime_core::{EntityId, TrackedItem};

use crate::error::StoreError;
use crate::traits::Storage;

/// In-memory item store for tests and embedded use.
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<RwLock<HashMap<EntityId, TrackedItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = TrackedItem>) -> Self {
        let map = items.into_iter().map(|i| (i.id, i)).collect();
        Self {
            items: Arc::new(RwLock::new(map)),
        }
    }

    /// Insert or replace an item.
    pub async fn insert(&self, item: TrackedItem) {
        self.items.write().await.insert(item.id, item);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn find_tracked_item(&self, id: EntityId) -> Result<Option<TrackedItem>, StoreError> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list_all_tracked_items(&self) -> Result<Vec<TrackedItem>, StoreError> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn update_last_fired(
        &self,
        id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.items.write().await.get_mut(&id) {
            Some(item) => {
                item.last_fired_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_tracked_item(&self, id: EntityId) -> Result<bool, StoreError> {
        Ok(self.items.write().await.remove(&id).is_some())
    }
}
