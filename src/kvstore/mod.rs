//! Byte-oriented key-value persistence.
//!
//! Everything that outlives a request (per-user token records, one-time OAuth
//! states) goes through the [`KvStore`] trait. Callers never touch physical keys
//! directly: they go through a [`HashedKeyStore`], which namespaces logical keys
//! under a prefix and makes them safe for any backend.
//!
//! ```text
//!   UserStore ("user_")    OAuthStateStore ("oauth2_state_")
//!          \                    /
//!           HashedKeyStore(prefix)
//!                   |
//!              dyn KvStore
//!            /            \
//!     SqliteKvStore    MemoryKvStore
//! ```

use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

/// Store-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist (or its TTL elapsed).
    #[error("not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Opaque byte store with optional per-key expiry.
pub trait KvStore: Send + Sync {
    /// Returns the stored bytes, or [`StoreError::NotFound`].
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Stores `value` without expiry, replacing any previous value.
    fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Stores `value` for `ttl_seconds`, after which it reads as not found.
    fn store_ttl(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError>;

    /// Removes the key. Deleting a missing key is [`StoreError::NotFound`].
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deletes every expired entry. Returns the number removed.
    fn cleanup_expired(&self) -> Result<usize, StoreError>;
}

/// Background task to periodically purge expired entries (OAuth states mostly).
pub async fn run_expiry_cleanup(store: Arc<dyn KvStore>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match store.cleanup_expired() {
            Ok(removed) => tracing::debug!(removed, "KV expiry cleanup complete"),
            Err(e) => tracing::warn!(error = %e, "KV expiry cleanup failed"),
        }
    }
}

/// Prefix-namespaced view over a shared [`KvStore`].
///
/// Physical keys are `prefix + base64url(logical_key)`: deterministic, collision
/// free across prefixes, and restricted to a backend-safe alphabet. The encoding
/// is for namespacing only, not secrecy.
#[derive(Clone)]
pub struct HashedKeyStore {
    inner: Arc<dyn KvStore>,
    prefix: String,
}

impl HashedKeyStore {
    pub fn new(inner: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Maps a logical key to the key actually written to the backend.
    pub fn physical_key(&self, logical_key: &str) -> String {
        format!("{}{}", self.prefix, BASE64_URL.encode(logical_key))
    }

    pub fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.load(&self.physical_key(key))
    }

    pub fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.store(&self.physical_key(key), value)
    }

    pub fn store_ttl(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
        self.inner
            .store_ttl(&self.physical_key(key), value, ttl_seconds)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(&self.physical_key(key))
    }
}

/// Loads and deserializes a JSON value. `NotFound` passes through unchanged.
pub fn load_json<T: DeserializeOwned>(store: &HashedKeyStore, key: &str) -> Result<T, StoreError> {
    let bytes = store.load(key)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serializes and stores a JSON value.
pub fn store_json<T: Serialize + ?Sized>(
    store: &HashedKeyStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    store.store(key, &bytes)
}
