//! REST call engine.
//!
//! One HTTP round trip per call, no retries. Every outcome is classified into
//! [`ApiError`] with the status code kept; bodies of failed responses are kept
//! on the error for diagnostics.

use super::error::ApiError;
use super::models::ResultEnvelope;
use super::query::Params;
use crate::config::{BridgeConfig, HttpConfig};
use crate::credentials::AccessToken;
use anyhow::Context;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Builds the shared HTTP client. The timeout applies to every request.
pub fn build_http_client(config: &HttpConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .context("Failed to build HTTP client")
}

/// Per-client policy taken from configuration.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Table prefix of the scoped app holding subscriptions
    pub app_scope: String,
    /// Shortest accepted record/catalog search term
    pub min_search_term_length: usize,
    /// Page size used when a listing asks for 0 rows
    pub default_page_size: u32,
    /// Upper bound on rows per listing call
    pub max_page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let config = BridgeConfig::default();
        Self::from_config(&config)
    }
}

impl ClientOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            app_scope: config.servicenow.app_scope.clone(),
            min_search_term_length: config.subscriptions.min_search_term_length,
            default_page_size: config.subscriptions.default_page_size,
            max_page_size: config.subscriptions.max_page_size,
        }
    }

    /// Clamps a requested page size into `1..=max_page_size`. 0 selects the
    /// default page size.
    pub fn page_size(&self, requested: u32) -> u32 {
        let requested = match requested {
            0 => self.default_page_size,
            n => n,
        };
        requested.clamp(1, self.max_page_size.max(1))
    }
}

/// Successful call result.
#[derive(Debug)]
pub struct Reply<T> {
    pub status: StatusCode,
    /// Raw body (empty for 204)
    pub body: Vec<u8>,
    /// Decoded body for 200/201 when a target type was requested
    pub data: Option<T>,
}

impl<T> Reply<T> {
    /// Returns the decoded value, failing if the response had no body.
    pub fn into_data(self) -> Result<(T, StatusCode), ApiError> {
        match self.data {
            Some(data) => Ok((data, self.status)),
            None => Err(ApiError::ResponseDecode {
                status: self.status,
                body: self.body,
                source: serde::de::Error::custom("response has no body"),
            }),
        }
    }
}

/// Structured error body returned on failures:
/// `{"error": {"message": "...", "detail": "..."}, "status": "failure"}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// HTTP client bound to one user's access token and one instance.
#[derive(Clone)]
pub struct ServiceNowClient {
    http: reqwest::Client,
    base_url: Url,
    token: AccessToken,
    options: ClientOptions,
}

impl ServiceNowClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        token: AccessToken,
        options: ClientOptions,
    ) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Request(format!("invalid base URL: {}", e)))?;
        if !base_url.has_host() {
            return Err(ApiError::Request("base URL has no host".to_string()));
        }
        // Relative paths are joined under the full base path
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            token,
            options,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Resolves `path` against the base URL unless it is already absolute.
    pub fn resolve(&self, path: &str) -> Result<Url, ApiError> {
        if let Ok(url) = Url::parse(path) {
            if url.has_host() {
                return Ok(url);
            }
            return Err(ApiError::Request(format!("unsupported URL '{}'", path)));
        }

        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Request(format!("invalid path '{}': {}", path, e)))
    }

    /// Issues one request and classifies the response.
    ///
    /// Query parameters replace any query string already on `path`. The
    /// content type header is only sent with a body.
    pub async fn call_raw(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
        params: &Params,
    ) -> Result<Reply<()>, ApiError> {
        let mut url = self.resolve(path)?;
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.as_slice());
        }

        debug!(method = %method, path = %url.path(), "Calling ServiceNow");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.token.access_token)
            .header(ACCEPT, CONTENT_TYPE_JSON);

        if let Some(body) = body {
            if let Some(content_type) = content_type {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Unreachable(self.scrub(e)))?;

        let status = response.status();
        let response_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Unreachable(self.scrub(e)))?
            .to_vec();

        debug!(status = %status, bytes = body.len(), "ServiceNow responded");

        if looks_like_non_json(&response_type, &body) {
            return Err(ApiError::UnexpectedContentType {
                status,
                content_type: response_type,
                body,
            });
        }

        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(Reply {
                status,
                body,
                data: Some(()),
            }),
            StatusCode::NO_CONTENT => Ok(Reply {
                status,
                body: Vec::new(),
                data: None,
            }),
            _ => Err(remote_error(status, body)),
        }
    }

    /// Like [`call_raw`](Self::call_raw), decoding a 200/201 body into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Option<Vec<u8>>,
        params: &Params,
    ) -> Result<Reply<T>, ApiError> {
        let reply = self
            .call_raw(method, path, content_type, body, params)
            .await?;

        let data = match reply.data {
            Some(()) => match serde_json::from_slice(&reply.body) {
                Ok(data) => Some(data),
                Err(source) => {
                    return Err(ApiError::ResponseDecode {
                        status: reply.status,
                        body: reply.body,
                        source,
                    })
                }
            },
            None => None,
        };

        Ok(Reply {
            status: reply.status,
            body: reply.body,
            data,
        })
    }

    /// JSON-encodes `body` and delegates to [`call`](Self::call).
    pub async fn call_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        params: &Params,
    ) -> Result<Reply<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let encoded = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(ApiError::Encode)?;
        self.call(method, path, Some(CONTENT_TYPE_JSON), encoded, params)
            .await
    }

    /// Table API helper: unwraps the `{"result": ...}` envelope.
    pub(crate) async fn call_result<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        params: &Params,
    ) -> Result<(T, StatusCode), ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (envelope, status) = self
            .call_json::<B, ResultEnvelope<T>>(method, path, body, params)
            .await?
            .into_data()?;
        Ok((envelope.result, status))
    }

    /// Renders a transport error without the instance's URL or host.
    fn scrub(&self, error: reqwest::Error) -> String {
        let error = error.without_url();
        let mut message = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        scrub_host(&self.base_url, &message)
    }
}

impl std::fmt::Debug for ServiceNowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceNowClient")
            .field("base_url", &self.base_url.as_str())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn scrub_host(base_url: &Url, message: &str) -> String {
    const REDACTED: &str = "<instance>";

    let mut scrubbed = message.replace(base_url.as_str().trim_end_matches('/'), REDACTED);
    if let Some(host) = base_url.host_str() {
        if let Some(port) = base_url.port_or_known_default() {
            scrubbed = scrubbed.replace(&format!("{}:{}", host, port), REDACTED);
        }
        scrubbed = scrubbed.replace(host, REDACTED);
    }
    scrubbed
}

/// HTML/XML error pages from proxies or a sleeping instance.
fn looks_like_non_json(content_type: &str, body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("html") || content_type.contains("xml") {
        return true;
    }
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}

fn remote_error(status: StatusCode, body: Vec<u8>) -> ApiError {
    let parsed = serde_json::from_slice::<ErrorEnvelope>(&body)
        .ok()
        .map(|envelope| envelope.error)
        .filter(|error| error.message.is_some() || error.detail.is_some());

    let (message, detail) = match parsed {
        Some(error) => (
            error.message.unwrap_or_default(),
            error.detail.unwrap_or_default(),
        ),
        None => (status_line(status), String::new()),
    };

    ApiError::Remote {
        status,
        message,
        detail,
        body,
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::Value;

    fn test_token() -> AccessToken {
        AccessToken {
            access_token: "test_token".to_string(),
            refresh_token: None,
            expiry: None,
            token_type: "Bearer".to_string(),
        }
    }

    fn client_for(base_url: &str) -> ServiceNowClient {
        ServiceNowClient::new(
            reqwest::Client::new(),
            base_url,
            test_token(),
            ClientOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_relative_paths() {
        let client = client_for("https://acme.service-now.com");
        assert_eq!(
            client.resolve("/api/now/table/incident").unwrap().as_str(),
            "https://acme.service-now.com/api/now/table/incident"
        );
        assert_eq!(
            client.resolve("api/now/table/incident").unwrap().as_str(),
            "https://acme.service-now.com/api/now/table/incident"
        );
    }

    #[test]
    fn test_page_size_bounds() {
        let mut config = BridgeConfig::default();
        config.subscriptions.max_page_size = 50;
        let options = ClientOptions::from_config(&config);

        assert_eq!(options.page_size(0), 20);
        assert_eq!(options.page_size(7), 7);
        assert_eq!(options.page_size(50), 50);
        assert_eq!(options.page_size(10_000), 50);
    }

    #[test]
    fn test_resolve_keeps_base_path() {
        let client = client_for("https://proxy.example.com/sn");
        assert_eq!(
            client.resolve("/api/now/table/incident").unwrap().as_str(),
            "https://proxy.example.com/sn/api/now/table/incident"
        );
    }

    #[test]
    fn test_resolve_absolute_url_untouched() {
        let client = client_for("https://acme.service-now.com");
        assert_eq!(
            client.resolve("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ServiceNowClient::new(
            reqwest::Client::new(),
            "not a url",
            test_token(),
            ClientOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Request(_)));
    }

    #[test]
    fn test_scrub_host() {
        let base = Url::parse("https://internal.corp.local:8443/").unwrap();
        let scrubbed = scrub_host(
            &base,
            "error sending request for url (https://internal.corp.local:8443/api): dns error for internal.corp.local",
        );
        assert!(!scrubbed.contains("internal.corp.local"));
        assert!(scrubbed.contains("<instance>"));
    }

    #[test]
    fn test_non_json_detection() {
        assert!(looks_like_non_json("text/html", b"<html></html>"));
        assert!(looks_like_non_json("", b"  \n<!DOCTYPE html>"));
        assert!(!looks_like_non_json("application/json", b"{\"a\":1}"));
        assert!(!looks_like_non_json("text/html", b""));
    }

    #[tokio::test]
    async fn test_200_decodes_into_target() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/thing")
            .match_header("authorization", "Bearer test_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"a":1}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let reply: Reply<Value> = client
            .call(Method::GET, "/api/thing", None, None, &Params::new())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.data.unwrap()["a"], 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_201_decodes() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/thing")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({"name": "x"})))
            .with_status(201)
            .with_body(r#"{"result":{"sys_id":"new"}}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let reply: Reply<Value> = client
            .call_json(
                Method::POST,
                "/api/thing",
                Some(&serde_json::json!({"name": "x"})),
                &Params::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.data.unwrap()["result"]["sys_id"], "new");
    }

    #[tokio::test]
    async fn test_204_returns_empty_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/api/thing/1")
            .with_status(204)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let reply: Reply<Value> = client
            .call(Method::DELETE, "/api/thing/1", None, None, &Params::new())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::NO_CONTENT);
        assert!(reply.body.is_empty());
        assert!(reply.data.is_none());
    }

    #[tokio::test]
    async fn test_404_structured_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/thing")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"m","detail":"d"}}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .call::<Value>(Method::GET, "/api/thing", None, None, &Params::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        let message = err.to_string();
        assert!(message.contains('m'));
        assert!(message.contains('d'));
        assert!(matches!(err, ApiError::Remote { ref message, ref detail, .. } if message == "m" && detail == "d"));
        assert_eq!(err.body().unwrap(), br#"{"error":{"message":"m","detail":"d"}}"#);
    }

    #[tokio::test]
    async fn test_unstructured_error_uses_status_line() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/thing")
            .with_status(500)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .call::<Value>(Method::GET, "/api/thing", None, None, &Params::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(err.to_string(), "500 Internal Server Error");
    }

    #[tokio::test]
    async fn test_html_body_is_unexpected_content_type() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/thing")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>Instance hibernating</body></html>")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .call::<Value>(Method::GET, "/api/thing", None, None, &Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::UnexpectedContentType { .. }));
        assert_eq!(err.status(), Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error_with_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/thing")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"a":"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .call::<Value>(Method::GET, "/api/thing", None, None, &Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ResponseDecode { .. }));
        assert_eq!(err.body().unwrap(), br#"{"a":"#);
    }

    #[tokio::test]
    async fn test_query_params_replace_existing_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/thing")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sysparm_limit".into(), "5".into()),
                Matcher::UrlEncoded("sysparm_query".into(), "a=1^b=2".into()),
            ]))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let params = Params::new().param("sysparm_query", "a=1^b=2").limit(5);
        client
            .call_raw(Method::GET, "/api/thing?stale=1", None, None, &params)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_content_type_without_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/thing")
            .match_header("content-type", Matcher::Missing)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = client_for(&server.url());
        client
            .call_raw(
                Method::GET,
                "/api/thing",
                Some(CONTENT_TYPE_JSON),
                None,
                &Params::new(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_scrubs_host() {
        // Nothing listens on port 1
        let client = client_for("http://127.0.0.1:1");
        let err = client
            .call_raw(Method::GET, "/api/now/table/incident", None, None, &Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Unreachable(_)));
        assert!(!err.to_string().contains("127.0.0.1"));
        assert_eq!(err.status(), None);
    }
}
