//! OAuth2 authorization-code login against an external identity provider.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::config::OAuthConfig;

/// Identity asserted by the provider after a successful code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalIdentity {
    /// Stable provider-side subject identifier.
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("oauth provider returned {0}")]
    Status(u16),
    #[error("oauth payload invalid: {0}")]
    Payload(String),
}

/// The token-exchange contract with an external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is redirected to, carrying `state` for CSRF protection.
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Exchange an authorization code for the caller's identity.
    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, OAuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Generic OAuth2/OIDC provider speaking the standard token and userinfo endpoints.
pub struct OAuthProvider {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthProvider {
    pub fn new(config: OAuthConfig) -> Result<Self, OAuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| OAuthError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn request_access_token(&self, code: &str) -> Result<String, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Status(response.status().as_u16()));
        }
        let payload = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| OAuthError::Payload(e.to_string()))?;
        if payload.access_token.trim().is_empty() {
            return Err(OAuthError::Payload("missing access_token".into()));
        }
        Ok(payload.access_token)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<ExternalIdentity, OAuthError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Status(response.status().as_u16()));
        }
        let identity = response
            .json::<ExternalIdentity>()
            .await
            .map_err(|e| OAuthError::Payload(e.to_string()))?;
        if identity.sub.trim().is_empty() || identity.email.trim().is_empty() {
            return Err(OAuthError::Payload("userinfo lacks sub or email".into()));
        }
        Ok(identity)
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| OAuthError::Payload(format!("authorize_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, OAuthError> {
        let access_token = self.request_access_token(code).await?;
        self.fetch_userinfo(&access_token).await
    }
}

/// Random value for the `state` parameter.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
