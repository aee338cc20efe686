//! In-memory credential and its conversion to and from the cache record.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::auth::oauth::TokenResponse;
use crate::auth::secure::{BearerToken, SecretString};
use crate::error::AuthError;
use crate::token_cache::CachedTokenRecord;

/// The signed-in user's session state.
#[derive(Debug, Clone)]
pub struct Credential {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: DateTime<Utc>,
    account: Option<String>,
    scopes: Vec<String>,
}

impl Credential {
    /// Build a credential from a token endpoint response received at `now`.
    ///
    /// A response without a refresh token keeps the one from `previous`.
    /// An `expires_in` that does not fit a timestamp is an invalid response.
    pub fn from_token_response(
        response: TokenResponse,
        scopes: Vec<String>,
        now: DateTime<Utc>,
        previous: Option<&Credential>,
    ) -> Result<Self, AuthError> {
        let expires_at = seconds_after(now, response.expires_in).ok_or_else(|| {
            AuthError::InvalidResponse(format!("expires_in out of range: {}", response.expires_in))
        })?;

        let account = response
            .id_token
            .as_deref()
            .and_then(account_from_id_token)
            .or_else(|| previous.and_then(|p| p.account.clone()));

        let refresh_token = response
            .refresh_token
            .clone()
            .map(SecretString::from)
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));

        Ok(Self {
            access_token: SecretString::from(response.access_token.clone()),
            refresh_token,
            expires_at,
            account,
            scopes,
        })
    }

    pub fn from_record(record: &CachedTokenRecord) -> Self {
        Self {
            access_token: SecretString::from(record.access_token.clone()),
            refresh_token: record.refresh_token.clone().map(SecretString::from),
            expires_at: record.expires_at,
            account: record.account.clone(),
            scopes: record.scopes.clone(),
        }
    }

    pub fn to_record(&self) -> CachedTokenRecord {
        CachedTokenRecord::new(
            self.access_token.as_str().to_string(),
            self.refresh_token.as_ref().map(|t| t.as_str().to_string()),
            self.expires_at,
            self.account.clone(),
            self.scopes.clone(),
        )
    }

    pub fn bearer(&self) -> BearerToken {
        BearerToken::from(&self.access_token)
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// True while the access token outlives `now` by more than `skew`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew)
            .is_some_and(|deadline| deadline > now)
    }

    /// True if every requested scope was part of the grant (case-insensitive).
    pub fn covers(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|r| self.scopes.iter().any(|s| s.eq_ignore_ascii_case(r)))
    }
}

/// Union of scope lists, keeping first-seen order and dropping case-insensitive duplicates.
pub fn merge_scopes<'a>(lists: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for scope in lists.into_iter().flatten() {
        if !merged.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            merged.push(scope.clone());
        }
    }
    merged
}

/// `now + seconds`, or `None` if the result is not representable.
pub(crate) fn seconds_after(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let delta = Duration::try_seconds(i64::try_from(seconds).ok()?)?;
    now.checked_add_signed(delta)
}

#[derive(Deserialize)]
struct IdTokenClaims {
    preferred_username: Option<String>,
    upn: Option<String>,
    oid: Option<String>,
}

/// Pull a display account name out of an id token.
///
/// The token is not verified; the result is only used for display.
fn account_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims.preferred_username.or(claims.upn).or(claims.oid)
}
