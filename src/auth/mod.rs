use reqwest::header::{HeaderMap, AUTHORIZATION};
use subtle::ConstantTimeEq;


/// Compares a presented webhook secret with the configured one in constant time.
///
/// An empty configured secret never matches, so webhooks stay closed until a
/// secret is set.
pub fn verify_webhook_secret(provided: &str, configured: &str) -> bool {
    if configured.is_empty() {
        return false;
    }
    provided.as_bytes().ct_eq(configured.as_bytes()).into()
}

/// Checks the `Authorization: Bearer <secret>` header of an inbound webhook.
pub fn authorize_webhook(headers: &HeaderMap, configured: &str) -> Result<(), WebhookAuthError> {
    if configured.is_empty() {
        return Err(WebhookAuthError::NotConfigured);
    }

    let header = headers
        .get(AUTHORIZATION)
        .ok_or(WebhookAuthError::Missing)?
        .to_str()
        .map_err(|_| WebhookAuthError::InvalidFormat)?;

    let secret = parse_bearer_secret(header)?;
    if verify_webhook_secret(&secret, configured) {
        Ok(())
    } else {
        Err(WebhookAuthError::Mismatch)
    }
}

/// Parse "Bearer <secret>" header value
fn parse_bearer_secret(header_value: &str) -> Result<String, WebhookAuthError> {
    let (scheme, secret) = header_value
        .split_once(' ')
        .ok_or(WebhookAuthError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(WebhookAuthError::InvalidFormat);
    }

    let secret = secret.trim();
    if secret.is_empty() {
        return Err(WebhookAuthError::Empty);
    }

    Ok(secret.to_string())
}

/// Webhook authentication failures
#[derive(Debug, PartialEq, Clone)]
pub enum WebhookAuthError {
    /// No webhook secret configured on this side
    NotConfigured,
    /// Authorization header not present
    Missing,
    /// Not "Bearer <secret>"
    InvalidFormat,
    /// Secret is empty string
    Empty,
    /// Secret does not match
    Mismatch,
}

impl std::fmt::Display for WebhookAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookAuthError::NotConfigured => write!(f, "Webhook secret is not configured"),
            WebhookAuthError::Missing => write!(f, "Webhook secret not provided"),
            WebhookAuthError::InvalidFormat => write!(f, "Invalid authorization header format"),
            WebhookAuthError::Empty => write!(f, "Webhook secret is empty"),
            WebhookAuthError::Mismatch => write!(f, "Webhook secret does not match"),
        }
    }
}

impl std::error::Error for WebhookAuthError {}
