//! Authenticated request dispatch to Microsoft Graph.
//!
//! Every call gets a bearer token from the [`CredentialManager`]. A 401 leads
//! to exactly one forced refresh and one retry; everything else is surfaced
//! as a distinct [`ApiError`] without local retries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::{BearerToken, CredentialManager};
use crate::config::Config;
use crate::error::{ApiError, CacheError};

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single logical Graph operation built by a caller.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    scopes: Vec<String>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            scopes: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Delegated permissions the operation needs.
    pub fn scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Successful Graph response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: Option<Value>,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let body = self
            .body
            .ok_or_else(|| ApiError::ParseFailed("empty response body".into()))?;
        serde_json::from_value(body).map_err(|e| ApiError::ParseFailed(e.to_string()))
    }
}

/// Graph error envelope (`{"error": {"code": "...", "message": "..."}}`).
#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Executes [`OutboundRequest`]s with a valid bearer token attached.
pub struct Dispatcher {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
}

impl Dispatcher {
    pub fn new(config: &Config, credentials: Arc<CredentialManager>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.api.graph_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Run the request, retrying once with a refreshed token on 401.
    pub async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, ApiError> {
        let token = self.credentials.get_token(&request.scopes).await?;

        match self.send(request, &token).await {
            Err(ApiError::Authentication(reason)) => {
                warn!(
                    "{} {} rejected the token ({}), refreshing and retrying once",
                    request.method, request.path, reason
                );
                let token = self
                    .credentials
                    .refresh_after_rejection(&token, &request.scopes)
                    .await?;
                self.send(request, &token).await
            }
            other => other,
        }
    }

    /// Discard the signed-in user's credential.
    pub async fn sign_out(&self) -> Result<(), CacheError> {
        self.credentials.sign_out().await
    }

    async fn send(
        &self,
        request: &OutboundRequest,
        token: &BearerToken,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let request_id = Uuid::new_v4();

        debug!("{} {} (client-request-id {})", request.method, url, request_id);

        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .bearer_auth(token.as_str())
            .header(ACCEPT, "application/json")
            .header("client-request-id", request_id.to_string());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await.map_err(ApiError::from_reqwest)?;
            let body = if status == StatusCode::NO_CONTENT || bytes.is_empty() {
                None
            } else {
                Some(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| ApiError::ParseFailed(e.to_string()))?,
                )
            };
            return Ok(ApiResponse {
                status: status.as_u16(),
                body,
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<GraphErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => (String::new(), format!("HTTP {}", status.as_u16())),
        };

        Err(classify_failure(status, code, message, retry_after))
    }
}

fn classify_failure(
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
) -> ApiError {
    match status.as_u16() {
        401 => ApiError::Authentication(message),
        403 => ApiError::Authorization(message),
        404 => ApiError::NotFound(message),
        429 => ApiError::RateLimited { retry_after },
        s if status.is_server_error() => {
            error!("Graph request failed: HTTP {} {} - {}", s, code, message);
            ApiError::Server { status: s, message }
        }
        s => {
            let message = if code.is_empty() {
                message
            } else {
                format!("{}: {}", code, message)
            };
            ApiError::BadRequest { status: s, message }
        }
    }
}
