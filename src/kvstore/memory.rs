//! In-process [`KvStore`] backend.

use super::{KvStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// 100 years
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 3600;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map-backed store. Used for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, key: &str, value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

        match entries.get(key) {
            Some(entry) if entry.is_expired(Utc::now()) => {
                entries.remove(key);
                Err(StoreError::NotFound)
            }
            Some(entry) => Ok(entry.value.clone()),
            None => Err(StoreError::NotFound),
        }
    }

    fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.put(key, value, None)
    }

    fn store_ttl(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
        // Clamped so the expiry timestamp cannot overflow
        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        self.put(key, value, Some(Utc::now() + ttl))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        match entries.remove(key) {
            Some(entry) if !entry.is_expired(Utc::now()) => Ok(()),
            _ => Err(StoreError::NotFound),
        }
    }

    fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}
