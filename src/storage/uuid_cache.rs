// src/storage/uuid_cache.rs
use dashmap::DashMap;
use log::debug;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CachedUuid {
    uuid: Uuid,
    fetched_at: u64,
}

/// Name → UUID lookups keyed by lowercase name. Player names are
/// case-insensitive on Mojang's side.
pub struct UuidCache {
    entries: DashMap<String, CachedUuid>,
    ttl_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl UuidCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_secs,
        }
    }

    pub fn get(&self, name: &str) -> Option<Uuid> {
        let now = now_secs();
        self.entries
            .get(&name.to_ascii_lowercase())
            .filter(|entry| now.saturating_sub(entry.fetched_at) < self.ttl_secs)
            .map(|entry| entry.uuid)
    }

    pub fn insert(&self, name: &str, uuid: Uuid) {
        self.entries.insert(
            name.to_ascii_lowercase(),
            CachedUuid {
                uuid,
                fetched_at: now_secs(),
            },
        );
    }

    pub fn cleanup_stale(&self) {
        let now = now_secs();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.fetched_at) < self.ttl_secs);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!("Evicted {} stale UUID cache entries", evicted);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
