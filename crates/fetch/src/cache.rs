use std::collections::HashMap;
use std::time::{Duration, Instant};

use airtime_core::EntityId;

use crate::wire::UpstreamEntity;

struct CacheEntry {
    payload: UpstreamEntity,
    created_at: Instant,
}

/// Time-bounded cache of upstream payloads.
///
/// Entries live for a fixed TTL from insertion. Failures are never stored,
/// so a bad lookup is retried on the next call instead of being pinned.
pub struct TtlCache {
    entries: HashMap<EntityId, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a live entry; expired entries are dropped on the way.
    pub fn get(&mut self, id: EntityId) -> Option<UpstreamEntity> {
        match self.entries.get(&id) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                self.hits += 1;
                Some(entry.payload.clone())
            }
            Some(_) => {
                self.entries.remove(&id);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, id: EntityId, payload: UpstreamEntity) {
        self.entries.insert(
            id,
            CacheEntry {
                payload,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.created_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
