//! OAuth2 device code and refresh token grants against Azure AD.

use crate::config::Config;
use crate::error::AuthError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grant type for device code polling (RFC 8628).
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Scopes added on the wire to every request so a refresh token and an id token are issued.
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Default polling interval when the provider does not send one.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// The identity provider operations the sign-in flow depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Start a device code session for the given scopes.
    async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeGrant, AuthError>;

    /// Ask whether the user has completed the device code session.
    async fn poll_device_code(&self, device_code: &str) -> Result<DevicePollResponse, AuthError>;

    /// Redeem a refresh token for a new access token.
    async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError>;
}

/// Device code session as issued by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Outcome of a single device code poll, as reported by the provider.
#[derive(Debug)]
pub enum DevicePollResponse {
    Pending,
    SlowDown,
    Expired,
    Denied,
    Completed(TokenResponse),
}

/// Token response from Azure AD.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// OAuth2 error body (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 client for Azure AD public client applications.
pub struct OAuth2Client {
    client_id: String,
    device_code_url: String,
    token_url: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            device_code_url: config.device_code_url()?.into(),
            token_url: config.token_url()?.into(),
            http_client,
        })
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Client {
    async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeGrant, AuthError> {
        let scope = wire_scope(scopes);
        let params = [("client_id", self.client_id.as_str()), ("scope", scope.as_str())];

        debug!("Requesting device code for scopes: {}", scope);

        let response = self
            .http_client
            .post(&self.device_code_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::InitiationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("Device code request failed: HTTP {} - {}", status, error_body);
            let code = serde_json::from_str::<OAuthErrorBody>(&error_body)
                .map(|b| format!(" ({})", b.error))
                .unwrap_or_default();
            return Err(AuthError::InitiationFailed(format!(
                "HTTP {}{}",
                status.as_u16(),
                code
            )));
        }

        response
            .json::<DeviceCodeGrant>()
            .await
            .map_err(|e| AuthError::InitiationFailed(e.to_string()))
    }

    async fn poll_device_code(&self, device_code: &str) -> Result<DevicePollResponse, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", device_code),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::PollFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let token_response = response
                .json::<TokenResponse>()
                .await
                .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
            return Ok(DevicePollResponse::Completed(token_response));
        }

        let error_body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorBody>(&error_body) {
            Ok(body) => classify_poll_error(body),
            Err(_) => {
                error!("Device code poll failed: HTTP {} - {}", status, error_body);
                Err(AuthError::PollFailed(format!("HTTP {}", status.as_u16())))
            }
        }
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = wire_scope(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            error!("Token refresh failed: HTTP {} - {}", status, error_body);

            if status.is_server_error() {
                return Err(AuthError::Network(format!("HTTP {}", status.as_u16())));
            }

            let reason = serde_json::from_str::<OAuthErrorBody>(&error_body)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return Err(AuthError::RefreshRejected(reason));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

/// Map an OAuth2 error body from the token endpoint onto the poll outcomes.
fn classify_poll_error(body: OAuthErrorBody) -> Result<DevicePollResponse, AuthError> {
    match body.error.as_str() {
        "authorization_pending" => Ok(DevicePollResponse::Pending),
        "slow_down" => Ok(DevicePollResponse::SlowDown),
        "expired_token" | "code_expired" => Ok(DevicePollResponse::Expired),
        "authorization_declined" | "access_denied" => Ok(DevicePollResponse::Denied),
        other => {
            error!(
                "Device code poll failed: {} - {}",
                other,
                body.error_description.as_deref().unwrap_or("")
            );
            Err(AuthError::PollFailed(other.to_string()))
        }
    }
}

/// Space-separated scope string with the reserved OIDC scopes appended once.
pub(crate) fn wire_scope(scopes: &[String]) -> String {
    let mut parts: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for reserved in RESERVED_SCOPES {
        if !parts.iter().any(|s| s.eq_ignore_ascii_case(reserved)) {
            parts.push(reserved);
        }
    }
    parts.join(" ")
}
