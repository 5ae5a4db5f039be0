//! Authorization-code and refresh-token grants.

use super::provider::OAuthProvider;
use super::OAuthError;
use crate::credentials::AccessToken;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> AccessToken {
        let expiry = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        AccessToken {
            access_token: self.access_token,
            // Keep the existing refresh token if the provider did not rotate it
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh.map(str::to_string)),
            expiry,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
        }
    }
}

/// Exchanges the authorization code from the callback for a token.
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &OAuthProvider,
    code: &str,
) -> Result<AccessToken, OAuthError> {
    if code.is_empty() {
        return Err(OAuthError::TokenExchange {
            status: None,
            message: "missing authorization code".into(),
        });
    }

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", provider.redirect_uri.as_str()),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];

    debug!("Exchanging authorization code for token at {}", provider.token_url);
    let response = request_token(http, provider, &form).await?;

    debug!(
        has_refresh_token = response.refresh_token.is_some(),
        expires_in = ?response.expires_in,
        "Token exchange successful"
    );
    Ok(response.into_token(None))
}

/// Uses the refresh token of `token` to obtain a new access token.
pub async fn refresh(
    http: &reqwest::Client,
    provider: &OAuthProvider,
    token: &AccessToken,
) -> Result<AccessToken, OAuthError> {
    let refresh_token = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::TokenExchange {
            status: None,
            message: "token has no refresh token".into(),
        })?;

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];

    info!("Refreshing OAuth token");
    let response = request_token(http, provider, &form).await?;
    info!(
        rotated = response.refresh_token.is_some(),
        "OAuth token refreshed successfully"
    );

    Ok(response.into_token(Some(refresh_token)))
}

async fn request_token(
    http: &reqwest::Client,
    provider: &OAuthProvider,
    form: &[(&str, &str)],
) -> Result<TokenResponse, OAuthError> {
    let response = http
        .post(&provider.token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| OAuthError::TokenExchange {
            status: None,
            message: format!("failed to send token request: {}", e.without_url()),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(OAuthError::TokenExchange {
            status: Some(status),
            message: describe_failure(status, &body),
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| OAuthError::TokenExchange {
            status: Some(status),
            message: format!("failed to parse token response: {}", e.without_url()),
        })
}

/// `{"error": "...", "error_description": "..."}` when the provider sends one,
/// the status line otherwise. The raw body is never echoed.
fn describe_failure(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    }

    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error,
            error_description: Some(description),
        }) if !description.is_empty() => format!("{}: {}", error, description),
        Ok(ErrorResponse { error, .. }) => error,
        Err(_) => format!("token endpoint returned {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn provider(base: &str) -> OAuthProvider {
        OAuthProvider {
            auth_url: format!("{}/oauth_auth.do", base),
            token_url: format!("{}/oauth_token.do", base),
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            redirect_uri: "http://localhost/callback".into(),
        }
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "at_1234567890",
            "refresh_token": "rt_0987654321",
            "scope": "useraccount",
            "token_type": "Bearer",
            "expires_in": 1799
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "at_1234567890");
        assert_eq!(response.refresh_token, Some("rt_0987654321".to_string()));
        assert_eq!(response.expires_in, Some(1799));

        let token = response.into_token(None);
        let remaining = token.expiry.unwrap() - Utc::now();
        assert!(remaining > Duration::seconds(1790) && remaining <= Duration::seconds(1799));
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        let token = response.into_token(Some("old_refresh"));

        assert_eq!(token.access_token, "t");
        assert_eq!(token.refresh_token.as_deref(), Some("old_refresh"));
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expiry.is_none());
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth_token.do")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "http://localhost/callback".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt","token_type":"Bearer","expires_in":1799}"#)
            .create_async()
            .await;

        let token = exchange_code(&reqwest::Client::new(), &provider(&server.url()), "the-code")
            .await
            .unwrap();

        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
        assert!(token.expiry.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth_token.do")
            .with_status(401)
            .with_body(r#"{"error":"access_denied","error_description":"Code expired"}"#)
            .create_async()
            .await;

        let err = exchange_code(&reqwest::Client::new(), &provider(&server.url()), "stale")
            .await
            .unwrap_err();

        match err {
            OAuthError::TokenExchange { status, message } => {
                assert_eq!(status, Some(StatusCode::UNAUTHORIZED));
                assert_eq!(message, "access_denied: Code expired");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_unrotated_refresh_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth_token.do")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt_old".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at_new","expires_in":1799}"#)
            .create_async()
            .await;

        let old = AccessToken {
            access_token: "at_old".into(),
            refresh_token: Some("rt_old".into()),
            expiry: Some(Utc::now()),
            token_type: "Bearer".into(),
        };
        let token = refresh(&reqwest::Client::new(), &provider(&server.url()), &old)
            .await
            .unwrap();

        assert_eq!(token.access_token, "at_new");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_old"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let token = AccessToken {
            access_token: "at".into(),
            refresh_token: None,
            expiry: None,
            token_type: "Bearer".into(),
        };
        let err = refresh(
            &reqwest::Client::new(),
            &provider("http://127.0.0.1:1"),
            &token,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OAuthError::TokenExchange { status: None, .. }));
    }

    #[test]
    fn test_describe_failure_never_echoes_body() {
        let message = describe_failure(StatusCode::BAD_GATEWAY, "<html>secret proxy</html>");
        assert_eq!(message, "token endpoint returned 502 Bad Gateway");
    }
}
