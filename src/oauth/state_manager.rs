//! One-time OAuth state values for CSRF protection.
//!
//! A state is `<15 random alphanumerics>_<platform user id>`. It is stored with
//! a TTL when the flow starts and consumed on the first callback that presents
//! it, whether or not that callback succeeds.

use super::OAuthError;
use crate::kvstore::{HashedKeyStore, KvStore};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix for pending states.
pub const STATE_KEY_PREFIX: &str = "oauth2_state_";

const STATE_RANDOM_LEN: usize = 15;

#[derive(Clone)]
pub struct OAuthStateStore {
    store: HashedKeyStore,
}

impl OAuthStateStore {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self {
            store: HashedKeyStore::new(backend, STATE_KEY_PREFIX),
        }
    }

    /// Generates and stores a new state for `user_id`, valid for `ttl_seconds`.
    pub fn create(&self, user_id: &str, ttl_seconds: u64) -> Result<String, OAuthError> {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_RANDOM_LEN)
            .map(char::from)
            .collect();
        let state = format!("{}_{}", random, user_id);

        self.store
            .store_ttl(&state, user_id.as_bytes(), ttl_seconds)?;
        debug!(user_id = %user_id, ttl_seconds, "Created OAuth state");

        Ok(state)
    }

    /// Consumes `state` and checks it was issued to `user_id`.
    ///
    /// # Returns
    /// * `Ok(())` - State was pending and belongs to the user
    /// * `Err(OAuthError::InvalidState)` - Unknown, expired or already used
    /// * `Err(OAuthError::StateMismatch)` - Issued to a different user
    pub fn verify(&self, state: &str, user_id: &str) -> Result<(), OAuthError> {
        let stored = self.store.load(state).map_err(not_found_as_invalid)?;

        // Single use, even when the checks below fail
        self.store.delete(state).map_err(not_found_as_invalid)?;

        let suffix_ok = state.ends_with(&format!("_{}", user_id));
        if !suffix_ok || stored != user_id.as_bytes() {
            warn!(user_id = %user_id, "OAuth state presented by a different user");
            return Err(OAuthError::StateMismatch);
        }

        Ok(())
    }
}

fn not_found_as_invalid(err: crate::kvstore::StoreError) -> OAuthError {
    if err.is_not_found() {
        OAuthError::InvalidState
    } else {
        OAuthError::Store(err)
    }
}
