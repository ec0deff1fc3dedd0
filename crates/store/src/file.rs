//! Single-file JSON store with write-back on every mutation.
//!
//! The whole item set is loaded once at construction and held in memory
//! behind an `RwLock`; mutations rewrite the file while the lock is held so
//! readers never observe a half-written set. A missing file at startup is an
//! empty store, not an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use airtime_core::{EntityId, TrackedItem};

use crate::error::StoreError;
use crate::traits::Storage;

pub struct FileStore {
    path: PathBuf,
    items: Arc<RwLock<HashMap<EntityId, TrackedItem>>>,
}

impl FileStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let items = if path.exists() {
            load_items(path)?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            HashMap::new()
        };

        info!(
            path = %path.display(),
            count = items.len(),
            "tracked item store initialized"
        );

        Ok(Self {
            path: path.to_path_buf(),
            items: Arc::new(RwLock::new(items)),
        })
    }

    /// Insert or replace an item and persist the new set.
    pub async fn insert(&self, item: TrackedItem) -> Result<(), StoreError> {
        let mut map = self.items.write().await;
        map.insert(item.id, item);
        self.write_back(&map)
    }

    fn write_back(&self, map: &HashMap<EntityId, TrackedItem>) -> Result<(), StoreError> {
        let mut list: Vec<&TrackedItem> = map.values().collect();
        list.sort_by_key(|i| i.id);
        let json = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn load_items(path: &Path) -> Result<HashMap<EntityId, TrackedItem>, StoreError> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let list: Vec<TrackedItem> = serde_json::from_str(&text)?;
    Ok(list.into_iter().map(|i| (i.id, i)).collect())
}

#[async_trait]
impl Storage for FileStore {
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
        let mut map = self.items.write().await;
        match map.get_mut(&id) {
            Some(item) => {
                item.last_fired_at = Some(at);
                self.write_back(&map)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_tracked_item(&self, id: EntityId) -> Result<bool, StoreError> {
        let mut map = self.items.write().await;
        if map.remove(&id).is_none() {
            return Ok(false);
        }
        self.write_back(&map)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use airtime_core::WeeklySchedule;

    use super::*;

    fn item(id: EntityId) -> TrackedItem {
        TrackedItem {
            id,
            title: format!("item-{id}"),
            image_url: None,
            schedule: WeeklySchedule {
                day: "Friday".to_string(),
                time: "23:30".to_string(),
                timezone: "America/New_York".to_string(),
            },
            last_fired_at: None,
            subscribers: vec![],
        }
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("tracked.json")).unwrap();
        assert!(store.list_all_tracked_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn items_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked.json");

        let store = FileStore::new(&path).unwrap();
        store.insert(item(1)).await.unwrap();
        store.insert(item(2)).await.unwrap();
        drop(store);

        let reopened = FileStore::new(&path).unwrap();
        let mut titles: Vec<String> = reopened
            .list_all_tracked_items()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["item-1", "item-2"]);
    }

    #[tokio::test]
    async fn update_last_fired_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked.json");
        let fired_at = Utc::now();

        let store = FileStore::new(&path).unwrap();
        store.insert(item(5)).await.unwrap();
        assert!(store.update_last_fired(5, fired_at).await.unwrap());
        assert!(!store.update_last_fired(99, fired_at).await.unwrap());
        drop(store);

        let reopened = FileStore::new(&path).unwrap();
        let found = reopened.find_tracked_item(5).await.unwrap().unwrap();
        assert_eq!(found.last_fired_at, Some(fired_at));
    }

    #[tokio::test]
    async fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked.json");

        let store = FileStore::new(&path).unwrap();
        store.insert(item(1)).await.unwrap();
        store.insert(item(2)).await.unwrap();
        assert!(store.remove_tracked_item(1).await.unwrap());
        assert!(!store.remove_tracked_item(1).await.unwrap());
        drop(store);

        let reopened = FileStore::new(&path).unwrap();
        let listed = reopened.list_all_tracked_items().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 2);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/tracked.json");
        let store = FileStore::new(&path).unwrap();
        store.insert(item(1)).await.unwrap();
        assert!(path.exists());
    }
}
