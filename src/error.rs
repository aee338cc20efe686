//! Error types for mcp-exchange.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication-related errors raised while acquiring a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The device code session could not be created.
    #[error("Could not start device code sign-in: {0}")]
    InitiationFailed(String),

    #[error("Device code sign-in expired before it was completed")]
    SessionExpired,

    #[error("Sign-in was declined by the user")]
    Denied,

    /// The identity provider refused the refresh token.
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("Device code polling failed: {0}")]
    PollFailed(String),

    /// The identity provider could not be reached or timed out.
    #[error("Identity provider unreachable: {0}")]
    Network(String),

    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),
}

/// Errors returned by the Graph request dispatcher and the Exchange client.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The API rejected the token even after a forced refresh.
    #[error("Unauthorized (401): {0}")]
    Authentication(String),

    #[error("Forbidden (403): {0}")]
    Authorization(String),

    #[error("Not found (404): {0}")]
    NotFound(String),

    #[error("Bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("Rate limited (429): Too many requests")]
    RateLimited { retry_after: Option<u64> },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Token cache persistence errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to write token cache {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove token cache {path}: {source}")]
    RemoveFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize token cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ApiError {
    /// Network, timeout, rate-limit and server failures. Retrying is the caller's call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Network(_)
                | Self::Timeout
                | Self::Auth(AuthError::Network(_))
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl AppError {
    /// Returns a user-friendly message.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::InitiationFailed(_)) => "Could not start sign-in. Try again later.",
            Self::Auth(AuthError::SessionExpired) => "Sign-in timed out. Please try again.",
            Self::Auth(AuthError::Denied) => "Sign-in was declined.",
            Self::Auth(AuthError::Network(_)) | Self::Api(ApiError::Auth(AuthError::Network(_))) => {
                "Could not reach the sign-in service. Check your connection."
            }
            Self::Api(ApiError::Authentication(_)) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Authorization(_)) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::NotFound(_)) => "The requested item was not found.",
            Self::Api(ApiError::RateLimited { .. }) => "Too many requests. Please wait a moment.",
            Self::Api(ApiError::Network(_)) | Self::Api(ApiError::Timeout) => {
                "Network error. Check your connection."
            }
            Self::Cache(_) => "Failed to update the token cache.",
            Self::Config(_) => "Configuration error. Please check settings.",
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if the stored credentials should be discarded.
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, Self::Api(ApiError::Authentication(_)))
    }
}
