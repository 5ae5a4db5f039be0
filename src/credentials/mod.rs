//! OAuth access tokens and their encrypted at-rest form.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       AccessToken                        │
//! │  - bearer credential for the ITSM API    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     (encode)              (decode)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCodec                         │
//! │  - JSON + AES-256-GCM                    │
//! │  - fresh nonce per token, prepended      │
//! │  - URL-safe base64 string                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       StoredUser.oauth2_token            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use itsm_bridge::credentials::{AccessToken, TokenCodec};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let codec = TokenCodec::new("0123456789abcdef0123456789abcdef")?;
//! let token = AccessToken {
//!     access_token: "access".to_string(),
//!     refresh_token: Some("refresh".to_string()),
//!     expiry: Some(Utc::now() + Duration::hours(1)),
//!     token_type: "Bearer".to_string(),
//! };
//!
//! let blob = codec.encode(&token)?;
//! assert_eq!(codec.decode(&blob)?, token);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Changing the encryption secret invalidates every stored blob; decode
//!   failures after a rotation mean the user must reconnect
//! - An empty secret disables encryption entirely (plain base64 JSON)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;

pub use encryption::{TokenCodec, TokenCodecError, KEY_SIZE, NONCE_SIZE};

/// OAuth2 bearer credential issued by the ITSM instance.
///
/// Field names follow the OAuth2 token JSON shape so that blobs written by
/// other clients of the same instance decode unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Bearer token sent on every API request
    pub access_token: String,

    /// Used to mint a new access token once this one expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AccessToken {
    /// Returns true if the token expires within `skew` of now.
    ///
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, skew: Duration) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= Utc::now() + skew,
            None => false,
        }
    }

    /// Returns true if the token is close to expiry and can be refreshed.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        self.refresh_token.is_some() && self.expires_within(skew)
    }
}
