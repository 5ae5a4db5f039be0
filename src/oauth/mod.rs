//! OAuth 2.0 connection lifecycle for platform users.
//!
//! Implements the authorization code flow:
//! 1. User runs "connect" in chat → [`TokenLifecycle::start_connect`] returns
//!    the instance's consent URL with a fresh one-time state
//! 2. User authorizes on the instance
//! 3. Instance redirects back with `code` and `state`
//! 4. [`TokenLifecycle::complete_connect`] verifies the state, exchanges the
//!    code, resolves the instance user and stores the encrypted token
//! 5. Every later request goes through [`TokenLifecycle::client_for`], which
//!    refreshes the token when it is about to expire

mod exchange;
mod provider;
mod state_manager;

pub use exchange::{exchange_code, refresh};
pub use provider::OAuthProvider;
pub use state_manager::{OAuthStateStore, STATE_KEY_PREFIX};

use crate::config::{BridgeConfig, SharedConfig};
use crate::credentials::{AccessToken, TokenCodec, TokenCodecError};
use crate::kvstore::{KvStore, StoreError};
use crate::servicenow::{ApiError, ClientOptions, ServiceNowClient};
use crate::users::{StoredUser, UserStore};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OAuthError {
    /// State is unknown, expired or was already used.
    #[error("invalid or expired OAuth state")]
    InvalidState,

    #[error("OAuth state was issued to a different user")]
    StateMismatch,

    #[error("token request failed: {message}")]
    TokenExchange {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("user {0} has not connected a ServiceNow account")]
    NotConnected(String),

    /// The stored token cannot be used any more; the user must connect again.
    #[error("reauthentication required: {0}")]
    ReauthenticationRequired(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] TokenCodecError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("OAuth is not configured: {0}")]
    Config(String),
}

/// One async lock per user, held across a token refresh.
type RefreshLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Connects users, keeps their tokens fresh and hands out bound clients.
///
/// Configuration is read from a fresh snapshot on every call, so a config
/// swap applies to the next request without disturbing calls in flight.
/// Refreshes are serialized per user within one process: concurrent callers
/// wait for the first refresh and reuse the token it stored.
#[derive(Clone)]
pub struct TokenLifecycle {
    config: SharedConfig,
    http: reqwest::Client,
    users: UserStore,
    states: OAuthStateStore,
    refresh_locks: RefreshLocks,
}

impl TokenLifecycle {
    pub fn new(config: SharedConfig, http: reqwest::Client, backend: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            http,
            users: UserStore::new(backend.clone()),
            states: OAuthStateStore::new(backend),
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Starts the flow for `user_id` and returns the URL to send them to.
    pub fn start_connect(&self, user_id: &str) -> Result<String, OAuthError> {
        let config = self.config.snapshot();
        let provider = OAuthProvider::from_config(&config)?;
        let state = self
            .states
            .create(user_id, config.oauth.state_ttl_seconds)?;

        info!(user_id = %user_id, "Starting OAuth connect");
        Ok(provider.authorization_url(&state))
    }

    /// Finishes the flow from the redirect callback.
    ///
    /// The state is consumed before anything else, so a failed exchange cannot
    /// be retried with the same callback URL.
    pub async fn complete_connect(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
        code: &str,
        state: &str,
    ) -> Result<StoredUser, OAuthError> {
        self.states.verify(state, user_id)?;

        let config = self.config.snapshot();
        let provider = OAuthProvider::from_config(&config)?;
        let codec = codec(&config)?;

        let token = exchange_code(&self.http, &provider, code).await?;
        let client = bind_client(&self.http, &config, token.clone())?;
        let (external_user, _) = client.get_me(email).await?;

        let user = StoredUser {
            user_id: user_id.to_string(),
            external_user,
            oauth2_token: codec.encode(&token)?,
            username: username.to_string(),
        };
        self.users.store_user(&user)?;

        info!(
            user_id = %user_id,
            external_user_id = %user.external_user.sys_id,
            has_refresh_token = token.refresh_token.is_some(),
            "User connected"
        );
        Ok(user)
    }

    /// Builds a client for `user_id`, refreshing the token first when it
    /// expires within the configured skew.
    pub async fn client_for(&self, user_id: &str) -> Result<ServiceNowClient, OAuthError> {
        let config = self.config.snapshot();
        let codec = codec(&config)?;
        let skew = chrono::Duration::seconds(config.oauth.refresh_skew_seconds);

        let (_, token) = self.load_token(&codec, user_id)?;
        if !token.needs_refresh(skew) {
            return Ok(bind_client(&self.http, &config, token)?);
        }

        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while this one waited
        let (mut user, token) = self.load_token(&codec, user_id)?;
        if !token.needs_refresh(skew) {
            return Ok(bind_client(&self.http, &config, token)?);
        }

        let provider = OAuthProvider::from_config(&config)?;
        let token = match refresh(&self.http, &provider, &token).await {
            Ok(token) => token,
            Err(OAuthError::TokenExchange {
                status: Some(status),
                message,
            }) if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED => {
                warn!(user_id = %user_id, status = %status, "Refresh token rejected");
                return Err(OAuthError::ReauthenticationRequired(message));
            }
            Err(e) => return Err(e),
        };

        user.oauth2_token = codec.encode(&token)?;
        self.users.store_user(&user)?;

        Ok(bind_client(&self.http, &config, token)?)
    }

    fn load_token(
        &self,
        codec: &TokenCodec,
        user_id: &str,
    ) -> Result<(StoredUser, AccessToken), OAuthError> {
        let user = self.users.load_user(user_id).map_err(|e| {
            if e.is_not_found() {
                OAuthError::NotConnected(user_id.to_string())
            } else {
                OAuthError::Store(e)
            }
        })?;

        let token = codec.decode(&user.oauth2_token).map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Stored token is unreadable");
            OAuthError::ReauthenticationRequired(e.to_string())
        })?;

        Ok((user, token))
    }

    fn refresh_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Forgets the user's connection.
    pub fn disconnect(&self, user_id: &str) -> Result<(), OAuthError> {
        self.users.delete_user(user_id).map_err(|e| {
            if e.is_not_found() {
                OAuthError::NotConnected(user_id.to_string())
            } else {
                OAuthError::Store(e)
            }
        })?;
        info!(user_id = %user_id, "User disconnected");
        Ok(())
    }
}

fn codec(config: &BridgeConfig) -> Result<TokenCodec, OAuthError> {
    Ok(TokenCodec::new(&config.security.encryption_secret)?)
}

fn bind_client(
    http: &reqwest::Client,
    config: &BridgeConfig,
    token: AccessToken,
) -> Result<ServiceNowClient, ApiError> {
    ServiceNowClient::new(
        http.clone(),
        &config.servicenow.base_url,
        token,
        ClientOptions::from_config(config),
    )
}
