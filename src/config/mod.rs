pub mod runtime;
pub use runtime::{new_shared_config, SharedConfig};

use crate::credentials::KEY_SIZE;
use anyhow::{bail, Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub servicenow: ServiceNowConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// ITSM instance connection
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceNowConfig {
    /// Instance base URL, e.g. "https://acme.service-now.com"
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub oauth_client_id: String,
    #[serde(default)]
    pub oauth_client_secret: String,
    /// Table prefix of the scoped app that stores subscriptions
    #[serde(default = "default_app_scope")]
    pub app_scope: String,
}

fn default_app_scope() -> String {
    "x_chat_bridge".to_string()
}

impl Default for ServiceNowConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            app_scope: default_app_scope(),
        }
    }
}

/// Secrets. Never logged.
#[derive(Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// 32-byte token encryption secret. Empty disables encryption.
    #[serde(default)]
    pub encryption_secret: String,
    /// Shared secret the instance presents on webhook calls
    #[serde(default)]
    pub webhook_secret: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_secret", &redacted(&self.encryption_secret))
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Chat server side of the integration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    /// Public URL of the chat server, written into every subscription
    #[serde(default)]
    pub site_url: String,
    /// Where the instance redirects after authorization
    #[serde(default)]
    pub oauth_redirect_url: String,
}

/// Outbound HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("itsm-bridge/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

/// Subscription listing, search and enrichment policy
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsConfig {
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_min_search_term_length")]
    pub min_search_term_length: usize,
    /// Concurrent record fetches per enrichment batch (0 = one per subscription)
    #[serde(default)]
    pub enrichment_concurrency: usize,
    /// Per-fetch deadline during enrichment (0 = transport timeout only)
    #[serde(default)]
    pub enrichment_timeout_seconds: u64,
}

fn default_max_page_size() -> u32 {
    100
}

fn default_page_size() -> u32 {
    20
}

fn default_min_search_term_length() -> usize {
    3
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
            default_page_size: default_page_size(),
            min_search_term_length: default_min_search_term_length(),
            enrichment_concurrency: 0,
            enrichment_timeout_seconds: 0,
        }
    }
}

impl SubscriptionsConfig {
    /// Clamps a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Persistence
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "itsm_bridge.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// OAuth lifecycle timing
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    /// Refresh tokens this close to expiry before using them
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: i64,
}

fn default_state_ttl() -> u64 {
    300
}

fn default_refresh_skew() -> i64 {
    90
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            refresh_skew_seconds: default_refresh_skew(),
        }
    }
}

impl BridgeConfig {
    /// Overrides values from `ITSM_*` environment variables.
    pub fn apply_env(mut self) -> Self {
        let vars = std::env::vars().filter(|(k, _)| k.starts_with("ITSM_"));
        for (key, value) in vars {
            self.apply_var(&key, value);
        }
        self
    }

    fn apply_var(&mut self, key: &str, value: String) {
        match key {
            "ITSM_BASE_URL" => self.servicenow.base_url = value,
            "ITSM_OAUTH_CLIENT_ID" => self.servicenow.oauth_client_id = value,
            "ITSM_OAUTH_CLIENT_SECRET" => self.servicenow.oauth_client_secret = value,
            "ITSM_ENCRYPTION_SECRET" => self.security.encryption_secret = value,
            "ITSM_WEBHOOK_SECRET" => self.security.webhook_secret = value,
            "ITSM_SITE_URL" => self.platform.site_url = value,
            "ITSM_OAUTH_REDIRECT_URL" => self.platform.oauth_redirect_url = value,
            "ITSM_DB_PATH" => self.storage.db_path = value,
            "ITSM_HTTP_TIMEOUT_SECONDS" => {
                if let Ok(n) = value.parse() {
                    self.http.timeout_seconds = n;
                }
            }
            "ITSM_ENRICHMENT_CONCURRENCY" => {
                if let Ok(n) = value.parse() {
                    self.subscriptions.enrichment_concurrency = n;
                }
            }
            _ => {}
        }
    }

    /// Checks the settings every authenticated call depends on.
    pub fn validate(&self) -> Result<()> {
        if self.servicenow.base_url.trim().is_empty() {
            bail!("servicenow.base_url is required");
        }
        reqwest::Url::parse(&self.servicenow.base_url)
            .with_context(|| format!("Invalid servicenow.base_url '{}'", self.servicenow.base_url))?;

        let secret_len = self.security.encryption_secret.len();
        if secret_len != 0 && secret_len != KEY_SIZE {
            bail!(
                "security.encryption_secret must be {} bytes (got {})",
                KEY_SIZE,
                secret_len
            );
        }

        if self.subscriptions.max_page_size == 0 {
            bail!("subscriptions.max_page_size must be positive");
        }

        Ok(())
    }

    /// True when tokens are stored without encryption.
    pub fn encryption_disabled(&self) -> bool {
        self.security.encryption_secret.is_empty()
    }
}

/// Load configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config.apply_env())
}

/// Generates a fresh encryption secret of the required length.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SIZE)
        .map(char::from)
        .collect()
}
