//! AES-256-GCM codec for OAuth tokens.
//!
//! Output layout is `base64url(nonce ‖ ciphertext)` where the ciphertext seals the
//! JSON-serialized token. The 32-byte encryption secret is used directly as the key.

use super::AccessToken;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Token codec failures.
#[derive(Debug, Error)]
pub enum TokenCodecError {
    #[error("encryption secret must be 32 bytes, got {0} bytes")]
    InvalidSecret(usize),

    #[error("failed to serialize token: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("token is not valid base64: {0}")]
    MalformedInput(#[from] base64::DecodeError),

    #[error("encrypted token is shorter than the nonce ({0} bytes)")]
    TooShort(usize),

    #[error("token authentication failed (wrong secret or tampered data)")]
    AuthenticationFailed,

    #[error("decrypted token is not a valid token: {0}")]
    DeserializationFailed(#[source] serde_json::Error),
}

/// Encodes and decodes [`AccessToken`]s under a fixed secret.
///
/// Build one per operation from the current configuration snapshot so a
/// secret change never lands halfway through an encode or decode.
#[derive(Clone)]
pub struct TokenCodec {
    cipher: Option<Aes256Gcm>,
}

impl TokenCodec {
    /// Creates a codec for `secret`.
    ///
    /// An empty secret disables encryption: tokens are stored as plain
    /// base64 JSON. Only acceptable outside production.
    pub fn new(secret: &str) -> Result<Self, TokenCodecError> {
        if secret.is_empty() {
            return Ok(Self { cipher: None });
        }

        let key = secret.as_bytes();
        if key.len() != KEY_SIZE {
            return Err(TokenCodecError::InvalidSecret(key.len()));
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| TokenCodecError::InvalidSecret(key.len()))?;

        Ok(Self {
            cipher: Some(cipher),
        })
    }

    /// Returns false when the codec runs in the unencrypted mode.
    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    /// Serializes and seals a token.
    pub fn encode(&self, token: &AccessToken) -> Result<String, TokenCodecError> {
        let json = serde_json::to_vec(token).map_err(TokenCodecError::Serialization)?;

        let Some(cipher) = &self.cipher else {
            return Ok(BASE64_URL.encode(json));
        };

        // Fresh nonce per token (never reuse)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, json.as_slice())
            .map_err(|_| TokenCodecError::AuthenticationFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        Ok(BASE64_URL.encode(blob))
    }

    /// Reverses [`TokenCodec::encode`].
    pub fn decode(&self, encoded: &str) -> Result<AccessToken, TokenCodecError> {
        let blob = BASE64_URL.decode(encoded)?;

        let json = match &self.cipher {
            None => blob,
            Some(cipher) => {
                if blob.len() < NONCE_SIZE {
                    return Err(TokenCodecError::TooShort(blob.len()));
                }
                let (nonce, sealed) = blob.split_at(NONCE_SIZE);
                cipher
                    .decrypt(Nonce::from_slice(nonce), sealed)
                    .map_err(|_| TokenCodecError::AuthenticationFailed)?
            }
        };

        serde_json::from_slice(&json).map_err(TokenCodecError::DeserializationFailed)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("encrypting", &self.is_encrypting())
            .finish()
    }
}
