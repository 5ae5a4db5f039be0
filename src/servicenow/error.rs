//! Error taxonomy for calls against the instance.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a REST call or a domain operation built on one.
///
/// Whenever a response was received its status code is kept, see
/// [`ApiError::status`], so callers can tell not-found from forbidden from a
/// server error without parsing messages.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure. The message has the instance host scrubbed out.
    #[error("ServiceNow is unreachable: {0}")]
    Unreachable(String),

    /// A non-JSON body (typically an HTML error page) where JSON was expected.
    #[error("unexpected content type '{content_type}' in response (status {status})")]
    UnexpectedContentType {
        status: StatusCode,
        content_type: String,
        body: Vec<u8>,
    },

    /// A success response whose body does not match the expected shape.
    #[error("failed to decode response (status {status}): {source}")]
    ResponseDecode {
        status: StatusCode,
        body: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    /// Any non-success status. `message` is the instance's error message (or
    /// the HTTP status line when the body carried no error envelope).
    #[error("{}", join_message(.message, .detail))]
    Remote {
        status: StatusCode,
        message: String,
        detail: String,
        body: Vec<u8>,
    },

    /// The subscription tables were never installed on the instance.
    #[error("subscriptions are not configured on the ServiceNow instance: {message}")]
    NotConfigured { status: StatusCode, message: String },

    /// The connected user may not manage subscriptions.
    #[error("user is not authorized to manage subscriptions: {message}")]
    NotAuthorized { status: StatusCode, message: String },

    /// The lookup succeeded but matched no user. `status` is the status of
    /// that (successful) response.
    #[error("no ServiceNow user found with email '{email}'")]
    UserNotFound { status: StatusCode, email: String },

    /// Rejected before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

fn join_message(message: &str, detail: &str) -> String {
    if detail.is_empty() {
        message.to_string()
    } else {
        format!("{}. {}", message.trim_end_matches('.'), detail)
    }
}

impl ApiError {
    /// HTTP status of the response that caused the error, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::UnexpectedContentType { status, .. }
            | ApiError::ResponseDecode { status, .. }
            | ApiError::Remote { status, .. }
            | ApiError::NotConfigured { status, .. }
            | ApiError::NotAuthorized { status, .. }
            | ApiError::UserNotFound { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body kept for diagnostics.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            ApiError::UnexpectedContentType { body, .. }
            | ApiError::ResponseDecode { body, .. }
            | ApiError::Remote { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::UserNotFound { .. })
            || self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// True for the errors the presentation layer turns into setup guidance.
    pub fn needs_admin_action(&self) -> bool {
        matches!(
            self,
            ApiError::NotConfigured { .. } | ApiError::NotAuthorized { .. }
        )
    }
}
