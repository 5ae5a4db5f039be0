//! Per-user connection records.
//!
//! One record per chat-platform user, keyed by the hashed platform user ID. The
//! record holds the encrypted token blob produced by
//! [`TokenCodec`](crate::credentials::TokenCodec) and the cached identity of the
//! user on the instance, so connecting does not need a `sys_user` lookup on
//! every request.

use crate::kvstore::{load_json, store_json, HashedKeyStore, KvStore, StoreError};
use crate::servicenow::ExternalUser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key prefix for user records.
pub const USER_KEY_PREFIX: &str = "user_";

/// Persisted connection of one platform user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    /// Chat-platform user ID
    pub user_id: String,

    /// Identity on the instance, resolved at connect time
    pub external_user: ExternalUser,

    /// Encrypted token blob (base64url)
    pub oauth2_token: String,

    /// Platform username, for display only
    #[serde(default)]
    pub username: String,
}

/// Typed view over the `user_` namespace of a [`KvStore`].
#[derive(Clone)]
pub struct UserStore {
    store: HashedKeyStore,
}

impl UserStore {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self {
            store: HashedKeyStore::new(backend, USER_KEY_PREFIX),
        }
    }

    /// Loads a user record.
    ///
    /// # Returns
    /// * `Ok(StoredUser)` - The user is connected
    /// * `Err(StoreError::NotFound)` - The user never connected (or disconnected)
    /// * `Err` - Backend or decoding failure
    pub fn load_user(&self, user_id: &str) -> Result<StoredUser, StoreError> {
        load_json(&self.store, user_id)
    }

    /// Writes a user record, replacing any previous one.
    pub fn store_user(&self, user: &StoredUser) -> Result<(), StoreError> {
        store_json(&self.store, &user.user_id, user)
    }

    /// Deletes a user record. Deleting an unknown user is `NotFound`.
    pub fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.store.delete(user_id)
    }

    pub fn physical_key(&self, user_id: &str) -> String {
        self.store.physical_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::{MemoryKvStore, SqliteKvStore};

    fn user(id: &str) -> StoredUser {
        StoredUser {
            user_id: id.to_string(),
            external_user: ExternalUser {
                sys_id: "6816f79cc0a8016401c5a33be04be441".to_string(),
                email: "beth@example.com".to_string(),
                user_name: "beth.anglin".to_string(),
            },
            oauth2_token: "sealed-blob".to_string(),
            username: "beth".to_string(),
        }
    }

    #[test]
    fn test_store_and_load() {
        let users = UserStore::new(Arc::new(MemoryKvStore::new()));
        users.store_user(&user("U1")).unwrap();

        let loaded = users.load_user("U1").unwrap();
        assert_eq!(loaded, user("U1"));
    }

    #[test]
    fn test_unknown_user_is_not_found() {
        let users = UserStore::new(Arc::new(MemoryKvStore::new()));
        assert!(users.load_user("nobody").unwrap_err().is_not_found());
        assert!(users.delete_user("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn test_store_replaces_record() {
        let users = UserStore::new(Arc::new(MemoryKvStore::new()));
        users.store_user(&user("U1")).unwrap();

        let mut updated = user("U1");
        updated.oauth2_token = "new-blob".to_string();
        users.store_user(&updated).unwrap();

        assert_eq!(users.load_user("U1").unwrap().oauth2_token, "new-blob");
    }

    #[test]
    fn test_delete_user() {
        let users = UserStore::new(Arc::new(MemoryKvStore::new()));
        users.store_user(&user("U1")).unwrap();
        users.delete_user("U1").unwrap();
        assert!(users.load_user("U1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_records_are_hashed_under_prefix() {
        let backend = Arc::new(MemoryKvStore::new());
        let users = UserStore::new(backend.clone());
        users.store_user(&user("U1")).unwrap();

        let key = users.physical_key("U1");
        assert!(key.starts_with(USER_KEY_PREFIX));
        assert!(backend.load(&key).is_ok());
        assert!(backend.load("U1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_sqlite_backend() {
        let users = UserStore::new(Arc::new(SqliteKvStore::new(":memory:").unwrap()));
        users.store_user(&user("U2")).unwrap();
        assert_eq!(users.load_user("U2").unwrap().username, "beth");
    }

    #[test]
    fn test_missing_username_defaults_empty() {
        let json = r#"{
            "user_id": "U3",
            "external_user": {"sys_id": "x"},
            "oauth2_token": "blob"
        }"#;
        let loaded: StoredUser = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.username, "");
        assert_eq!(loaded.external_user.email, "");
    }
}
