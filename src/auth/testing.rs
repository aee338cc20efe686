//! Test doubles for the identity provider, the clock and the sign-in prompt.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::auth::clock::Clock;
use crate::auth::device_code::{DeviceCodeSession, SignInPrompt};
use crate::auth::oauth::{DeviceCodeGrant, DevicePollResponse, IdentityProvider, TokenResponse};
use crate::error::AuthError;

/// Virtual clock; `sleep` advances time instantly and yields to other tasks.
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .expect("valid start time");
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: StdDuration) {
        self.advance(Duration::from_std(duration).unwrap());
        tokio::task::yield_now().await;
    }
}

/// Scripted identity provider that counts every call.
pub struct MockProvider {
    begin_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    begin_scopes: Mutex<Vec<Vec<String>>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    device_code_error: Mutex<Option<AuthError>>,
    poll_error: Mutex<Option<AuthError>>,
    device_code_lifetime: Mutex<u64>,
    polls: Mutex<VecDeque<DevicePollResponse>>,
    refreshes: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            begin_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            begin_scopes: Mutex::new(Vec::new()),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            device_code_error: Mutex::new(None),
            poll_error: Mutex::new(None),
            device_code_lifetime: Mutex::new(900),
            polls: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn token(access: &str, refresh: &str) -> TokenResponse {
        TokenResponse {
            access_token: access.into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            refresh_token: Some(refresh.into()),
            scope: String::new(),
            id_token: None,
        }
    }

    pub fn completed(access: &str, refresh: &str) -> DevicePollResponse {
        DevicePollResponse::Completed(Self::token(access, refresh))
    }

    /// Responses for upcoming polls; once exhausted every poll is pending.
    pub fn script_polls(&self, responses: Vec<DevicePollResponse>) {
        *self.polls.lock().unwrap() = responses.into();
    }

    /// Results for upcoming refreshes; once exhausted refreshes are rejected.
    pub fn script_refreshes(&self, results: Vec<Result<TokenResponse, AuthError>>) {
        *self.refreshes.lock().unwrap() = results.into();
    }

    pub fn fail_device_code(&self, error: AuthError) {
        *self.device_code_error.lock().unwrap() = Some(error);
    }

    /// Every poll fails with `error` until cleared.
    pub fn fail_polls(&self, error: AuthError) {
        *self.poll_error.lock().unwrap() = Some(error);
    }

    pub fn set_device_code_lifetime(&self, seconds: u64) {
        *self.device_code_lifetime.lock().unwrap() = seconds;
    }

    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn begin_scopes(&self) -> Vec<Vec<String>> {
        self.begin_scopes.lock().unwrap().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeGrant, AuthError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_scopes.lock().unwrap().push(scopes.to_vec());
        tokio::task::yield_now().await;

        if let Some(error) = self.device_code_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(DeviceCodeGrant {
            device_code: "device-code".into(),
            user_code: "USER-CODE".into(),
            verification_uri: "https://microsoft.com/devicelogin".into(),
            expires_in: *self.device_code_lifetime.lock().unwrap(),
            interval: 5,
            message: None,
        })
    }

    async fn poll_device_code(&self, _device_code: &str) -> Result<DevicePollResponse, AuthError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.poll_error.lock().unwrap().clone() {
            return Err(error);
        }
        let next = self.polls.lock().unwrap().pop_front();
        Ok(next.unwrap_or(DevicePollResponse::Pending))
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        _scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        tokio::task::yield_now().await;

        let next = self.refreshes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(AuthError::RefreshRejected("invalid_grant".into())))
    }
}

/// Records the user codes it was asked to display.
#[derive(Default)]
pub struct RecordingPrompt {
    shown: Mutex<Vec<String>>,
}

impl RecordingPrompt {
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

impl SignInPrompt for RecordingPrompt {
    fn show(&self, session: &DeviceCodeSession) {
        self.shown.lock().unwrap().push(session.user_code().to_string());
    }
}
