//! Device code sign-in (RFC 8628).
//!
//! A [`DeviceCodeSession`] moves through pending → {completed, expired, denied}.
//! Transitions only happen on provider answers or on the session's own
//! expiry; polling never runs faster than the provider's interval and never
//! past the session deadline.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::auth::clock::Clock;
use crate::auth::credential::{seconds_after, Credential};
use crate::auth::oauth::{DevicePollResponse, IdentityProvider};
use crate::auth::secure::SecretString;
use crate::error::AuthError;

/// Seconds added to the polling interval when the provider asks us to slow down.
const SLOW_DOWN_INCREMENT_SECS: i64 = 5;

/// Upper bound on the wait between polls.
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Where a device code session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Completed,
    Expired,
    Denied,
}

/// Result of one poll.
#[derive(Debug)]
pub enum PollStatus {
    Pending,
    Expired,
    Denied,
    Completed(Credential),
}

/// One in-progress interactive sign-in.
#[derive(Debug)]
pub struct DeviceCodeSession {
    verification_uri: String,
    user_code: String,
    message: Option<String>,
    device_code: SecretString,
    scopes: Vec<String>,
    interval: Duration,
    expires_at: DateTime<Utc>,
    next_poll_at: DateTime<Utc>,
    state: SessionState,
}

impl DeviceCodeSession {
    pub fn verification_uri(&self) -> &str {
        &self.verification_uri
    }

    pub fn user_code(&self) -> &str {
        &self.user_code
    }

    /// Provider-supplied instructions, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

/// Shows sign-in instructions to the human operator.
pub trait SignInPrompt: Send + Sync {
    fn show(&self, session: &DeviceCodeSession);
}

/// Writes instructions to stderr; stdout stays free for command output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrPrompt;

impl SignInPrompt for StderrPrompt {
    fn show(&self, session: &DeviceCodeSession) {
        eprintln!();
        eprintln!("{}", "=".repeat(60));
        eprintln!("AUTHENTICATION REQUIRED");
        eprintln!("{}", "=".repeat(60));
        eprintln!();
        eprintln!("To sign in, visit: {}", session.verification_uri());
        eprintln!("Enter this code: {}", session.user_code());
        if let Some(message) = session.message() {
            eprintln!();
            eprintln!("{}", message);
        }
        eprintln!();
        eprintln!(
            "Waiting for authentication (expires at {})...",
            session.expires_at().format("%H:%M:%S UTC")
        );
    }
}

/// Drives the device code grant against an [`IdentityProvider`].
pub struct DeviceCodeAuthenticator {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    prompt: Arc<dyn SignInPrompt>,
}

impl DeviceCodeAuthenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        prompt: Arc<dyn SignInPrompt>,
    ) -> Self {
        Self {
            provider,
            clock,
            prompt,
        }
    }

    /// Request a new device code session for `scopes`.
    pub async fn begin(&self, scopes: &[String]) -> Result<DeviceCodeSession, AuthError> {
        let grant = self
            .provider
            .request_device_code(scopes)
            .await
            .map_err(|e| match e {
                AuthError::InitiationFailed(_) => e,
                other => AuthError::InitiationFailed(other.to_string()),
            })?;

        let now = self.clock.now();
        let expires_at = seconds_after(now, grant.expires_in).ok_or_else(|| {
            AuthError::InitiationFailed(format!("expires_in out of range: {}", grant.expires_in))
        })?;
        let interval = Duration::seconds(grant.interval.clamp(1, MAX_POLL_INTERVAL_SECS) as i64);

        info!(
            "Device code session started, expires in {} seconds",
            grant.expires_in
        );

        Ok(DeviceCodeSession {
            verification_uri: grant.verification_uri,
            user_code: grant.user_code,
            message: grant.message,
            device_code: SecretString::from(grant.device_code),
            scopes: scopes.to_vec(),
            interval,
            expires_at,
            next_poll_at: now + interval,
            state: SessionState::Pending,
        })
    }

    /// Poll the provider once, waiting first if the interval has not elapsed.
    pub async fn poll(&self, session: &mut DeviceCodeSession) -> Result<PollStatus, AuthError> {
        match session.state {
            SessionState::Pending => {}
            SessionState::Expired => return Ok(PollStatus::Expired),
            SessionState::Denied => return Ok(PollStatus::Denied),
            SessionState::Completed => {
                return Err(AuthError::PollFailed("session already completed".into()))
            }
        }

        let now = self.clock.now();
        if now >= session.expires_at {
            return Ok(expire(session));
        }

        if now < session.next_poll_at {
            let wake_at = session.next_poll_at.min(session.expires_at);
            let wait = (wake_at - now).to_std().unwrap_or_default();
            self.clock.sleep(wait).await;

            if self.clock.now() >= session.expires_at {
                return Ok(expire(session));
            }
        }

        let response = self
            .provider
            .poll_device_code(session.device_code.as_str())
            .await
            .map_err(|e| match e {
                AuthError::PollFailed(_) | AuthError::InvalidResponse(_) => e,
                other => AuthError::PollFailed(other.to_string()),
            })?;
        let now = self.clock.now();

        match response {
            DevicePollResponse::Pending => {
                session.next_poll_at = now + session.interval;
            }
            DevicePollResponse::SlowDown => {
                session.interval = (session.interval + Duration::seconds(SLOW_DOWN_INCREMENT_SECS))
                    .min(Duration::seconds(MAX_POLL_INTERVAL_SECS as i64));
                session.next_poll_at = now + session.interval;
                debug!(
                    "Provider asked to slow down, polling every {}s",
                    session.interval.num_seconds()
                );
            }
            DevicePollResponse::Expired => return Ok(expire(session)),
            DevicePollResponse::Denied => {
                warn!("Device code sign-in was declined");
                session.state = SessionState::Denied;
                return Ok(PollStatus::Denied);
            }
            DevicePollResponse::Completed(token_response) => {
                let credential = Credential::from_token_response(
                    token_response,
                    session.scopes.clone(),
                    now,
                    None,
                )?;
                session.state = SessionState::Completed;
                return Ok(PollStatus::Completed(credential));
            }
        }

        if now >= session.expires_at {
            Ok(expire(session))
        } else {
            Ok(PollStatus::Pending)
        }
    }

    /// Run a complete interactive sign-in: begin, prompt, poll to a terminal state.
    pub async fn sign_in(&self, scopes: &[String]) -> Result<Credential, AuthError> {
        let mut session = self.begin(scopes).await?;
        self.prompt.show(&session);

        loop {
            match self.poll(&mut session).await? {
                PollStatus::Pending => continue,
                PollStatus::Completed(credential) => {
                    info!("Successfully authenticated via device code flow");
                    return Ok(credential);
                }
                PollStatus::Expired => return Err(AuthError::SessionExpired),
                PollStatus::Denied => return Err(AuthError::Denied),
            }
        }
    }
}

fn expire(session: &mut DeviceCodeSession) -> PollStatus {
    if session.state != SessionState::Expired {
        warn!("Device code session expired");
    }
    session.state = SessionState::Expired;
    PollStatus::Expired
}
