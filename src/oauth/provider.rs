//! OAuth endpoints and client registration of the instance.

use super::OAuthError;
use crate::config::BridgeConfig;

const AUTHORIZE_PATH: &str = "oauth_auth.do";
const TOKEN_PATH: &str = "oauth_token.do";

/// OAuth provider configuration
#[derive(Clone)]
pub struct OAuthProvider {
    /// Authorization endpoint URL
    pub auth_url: String,

    /// Token endpoint URL
    pub token_url: String,

    pub client_id: String,

    pub client_secret: String,

    /// Callback the instance redirects to after consent
    pub redirect_uri: String,
}

impl OAuthProvider {
    /// Derives the endpoints from the instance base URL.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, OAuthError> {
        let servicenow = &config.servicenow;
        if servicenow.base_url.is_empty() {
            return Err(OAuthError::Config("ServiceNow base URL is not set".into()));
        }
        if servicenow.oauth_client_id.is_empty() || servicenow.oauth_client_secret.is_empty() {
            return Err(OAuthError::Config(
                "OAuth client ID and secret must be set".into(),
            ));
        }

        let base = servicenow.base_url.trim_end_matches('/');
        Ok(Self {
            auth_url: format!("{}/{}", base, AUTHORIZE_PATH),
            token_url: format!("{}/{}", base, TOKEN_PATH),
            client_id: servicenow.oauth_client_id.clone(),
            client_secret: servicenow.oauth_client_secret.clone(),
            redirect_uri: config.platform.oauth_redirect_url.clone(),
        })
    }

    /// Build authorization URL with state and redirect_uri
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state)
        )
    }
}

impl std::fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}
