//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Placeholder shipped in config.toml.
const CLIENT_ID_PLACEHOLDER: &str = "YOUR_AZURE_AD_CLIENT_ID";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub token: TokenConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub authority_host: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_base_url: String,
    pub timeout_seconds: u64,
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub cache_path: String,
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse the embedded defaults without overrides or validation.
    pub fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Apply `EXCHANGE_*` overrides using the given variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("EXCHANGE_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Some(tenant) = lookup("EXCHANGE_TENANT_ID") {
            self.oauth.tenant = tenant;
        }

        if let Some(cache_path) = lookup("EXCHANGE_TOKEN_CACHE") {
            self.token.cache_path = cache_path;
        }

        if let Some(timeout) = lookup("EXCHANGE_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => self.api.timeout_seconds = seconds,
                _ => warn!(
                    "Invalid EXCHANGE_TIMEOUT value '{}', using default {}",
                    timeout, self.api.timeout_seconds
                ),
            }
        }

        if let Some(timezone) = lookup("EXCHANGE_TIMEZONE") {
            self.api.timezone = timezone;
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.trim().is_empty() || self.oauth.client_id == CLIENT_ID_PLACEHOLDER {
            anyhow::bail!(
                "Azure AD client_id not configured. Set EXCHANGE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.trim().is_empty() {
            anyhow::bail!("Azure AD tenant must not be empty (use \"common\" for any organization)");
        }

        self.authority()?;

        Ok(())
    }

    /// Authority URL for the configured tenant, with a trailing slash.
    pub fn authority(&self) -> Result<Url> {
        let host = format!("{}/", self.oauth.authority_host.trim_end_matches('/'));
        Url::parse(&host)
            .and_then(|base| base.join(&format!("{}/", self.oauth.tenant.trim_matches('/'))))
            .with_context(|| format!("Invalid authority host '{}'", self.oauth.authority_host))
    }

    /// Device code endpoint of the authority.
    pub fn device_code_url(&self) -> Result<Url> {
        Ok(self.authority()?.join("oauth2/v2.0/devicecode")?)
    }

    /// Token endpoint of the authority.
    pub fn token_url(&self) -> Result<Url> {
        Ok(self.authority()?.join("oauth2/v2.0/token")?)
    }

    /// Network timeout for identity provider and Graph calls.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    /// Token cache location with a leading `~` expanded to the home directory.
    pub fn token_cache_path(&self) -> PathBuf {
        expand_home(&self.token.cache_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(env::temp_dir);

    if path == "~" {
        home()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home().join(rest)
    } else {
        PathBuf::from(path)
    }
}
