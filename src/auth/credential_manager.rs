//! Credential lifecycle: cache restore, silent refresh and interactive sign-in.
//!
//! The manager is the only owner of the [`Credential`]. Everything that leaves
//! it is a [`BearerToken`]. All transitions out of the unauthenticated and
//! expired states run under one async mutex, so overlapping callers wait for
//! the in-flight refresh or sign-in instead of starting their own.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::clock::{Clock, SystemClock};
use crate::auth::credential::{merge_scopes, Credential};
use crate::auth::device_code::{DeviceCodeAuthenticator, SignInPrompt, StderrPrompt};
use crate::auth::oauth::{IdentityProvider, OAuth2Client};
use crate::auth::secure::BearerToken;
use crate::config::Config;
use crate::error::{AuthError, CacheError};
use crate::token_cache::TokenCacheStore;

/// Default margin before expiry at which a token is no longer handed out.
const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

/// Observable state of the held credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Unauthenticated,
    Valid,
    Expired,
}

struct Session {
    credential: Option<Credential>,
    /// Set when the API rejected the current token regardless of its expiry.
    invalidated: bool,
}

/// Sole source of bearer tokens for outbound calls.
pub struct CredentialManager {
    provider: Arc<dyn IdentityProvider>,
    authenticator: DeviceCodeAuthenticator,
    store: TokenCacheStore,
    clock: Arc<dyn Clock>,
    default_scopes: Vec<String>,
    refresh_skew: Duration,
    session: Mutex<Session>,
}

impl CredentialManager {
    /// Create a manager and restore whatever credential the cache holds.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: TokenCacheStore,
        clock: Arc<dyn Clock>,
        prompt: Arc<dyn SignInPrompt>,
    ) -> Self {
        let credential = store.load().map(|record| Credential::from_record(&record));

        match &credential {
            Some(c) => info!(
                "Restored cached credential for {} (expires {})",
                c.account().unwrap_or("unknown account"),
                c.expires_at()
            ),
            None => info!("No cached credential, sign-in will be required"),
        }

        let authenticator =
            DeviceCodeAuthenticator::new(Arc::clone(&provider), Arc::clone(&clock), prompt);

        Self {
            provider,
            authenticator,
            store,
            clock,
            default_scopes: Vec::new(),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            session: Mutex::new(Session {
                credential,
                invalidated: false,
            }),
        }
    }

    /// Build the production manager: Azure AD client, system clock, stderr prompt.
    pub fn from_config(config: &Config) -> Result<Self> {
        let skew_secs = config.token.refresh_before_expiry_seconds;
        let skew = i64::try_from(skew_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .with_context(|| format!("refresh_before_expiry_seconds out of range: {}", skew_secs))?;

        let provider = Arc::new(OAuth2Client::new(config)?);
        let store = TokenCacheStore::new(config.token_cache_path());

        Ok(Self::new(provider, store, Arc::new(SystemClock), Arc::new(StderrPrompt))
            .with_default_scopes(config.oauth.scopes.scopes.clone())
            .with_refresh_skew(skew))
    }

    /// Scopes always requested on sign-in and refresh, on top of the caller's.
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub async fn state(&self) -> CredentialState {
        let session = self.session.lock().await;
        match &session.credential {
            None => CredentialState::Unauthenticated,
            Some(c) if !session.invalidated && c.is_valid_at(self.clock.now(), self.refresh_skew) => {
                CredentialState::Valid
            }
            Some(_) => CredentialState::Expired,
        }
    }

    /// Account name of the held credential, if known.
    pub async fn account(&self) -> Option<String> {
        let session = self.session.lock().await;
        session
            .credential
            .as_ref()
            .and_then(|c| c.account().map(String::from))
    }

    /// Return a valid token covering `scopes`, refreshing or signing in as needed.
    pub async fn get_token(&self, scopes: &[String]) -> Result<BearerToken, AuthError> {
        let mut session = self.session.lock().await;

        if let Some(token) = self.usable_token(&session, scopes) {
            return Ok(token);
        }

        self.acquire(&mut session, scopes).await
    }

    /// Refresh (or sign in again) even if the held token looks valid.
    pub async fn force_refresh(&self) -> Result<BearerToken, AuthError> {
        let mut session = self.session.lock().await;
        session.invalidated = true;
        self.acquire(&mut session, &[]).await
    }

    /// Called after the API rejected `rejected`.
    ///
    /// Only forces a refresh when `rejected` is still the held token; if another
    /// caller already replaced it, the replacement is returned.
    pub async fn refresh_after_rejection(
        &self,
        rejected: &BearerToken,
        scopes: &[String],
    ) -> Result<BearerToken, AuthError> {
        let mut session = self.session.lock().await;

        if let Some(token) = self.usable_token(&session, scopes) {
            if &token != rejected {
                debug!("Token already replaced by a concurrent refresh");
                return Ok(token);
            }
        }

        session.invalidated = true;
        self.acquire(&mut session, scopes).await
    }

    /// Forget the credential in memory and on disk.
    pub async fn sign_out(&self) -> Result<(), CacheError> {
        let mut session = self.session.lock().await;
        session.credential = None;
        session.invalidated = false;
        self.store.clear()?;
        info!("Signed out");
        Ok(())
    }

    fn usable_token(&self, session: &Session, scopes: &[String]) -> Option<BearerToken> {
        let credential = session.credential.as_ref()?;
        let usable = !session.invalidated
            && credential.is_valid_at(self.clock.now(), self.refresh_skew)
            && credential.covers(scopes);
        usable.then(|| credential.bearer())
    }

    /// Silent refresh first, device code sign-in if the refresh token is refused.
    async fn acquire(
        &self,
        session: &mut Session,
        requested: &[String],
    ) -> Result<BearerToken, AuthError> {
        let held: Vec<String> = session
            .credential
            .as_ref()
            .map(|c| c.scopes().to_vec())
            .unwrap_or_default();
        let scopes = merge_scopes([
            self.default_scopes.as_slice(),
            held.as_slice(),
            requested,
        ]);

        if let Some(previous) = session.credential.clone() {
            if let Some(refresh_token) = previous.refresh_token() {
                info!("Refreshing access token silently");
                match self.provider.refresh_token(refresh_token.as_str(), &scopes).await {
                    Ok(response) => {
                        let credential = Credential::from_token_response(
                            response,
                            scopes,
                            self.clock.now(),
                            Some(&previous),
                        )?;
                        info!("Token refreshed, expires at {}", credential.expires_at());
                        return Ok(self.install(session, credential));
                    }
                    Err(AuthError::RefreshRejected(reason)) => {
                        warn!("Refresh token rejected ({}), interactive sign-in required", reason);
                    }
                    Err(e) => return Err(e),
                }
            }

            session.credential = None;
            session.invalidated = false;
            if let Err(e) = self.store.clear() {
                warn!("Failed to clear stale token cache: {}", e);
            }
        }

        info!("No usable credential, starting device code sign-in");
        let credential = self.authenticator.sign_in(&scopes).await?;
        Ok(self.install(session, credential))
    }

    fn install(&self, session: &mut Session, credential: Credential) -> BearerToken {
        if let Err(e) = self.store.save(&credential.to_record()) {
            warn!("Failed to persist token cache: {}", e);
        }

        let token = credential.bearer();
        session.credential = Some(credential);
        session.invalidated = false;
        token
    }
}
