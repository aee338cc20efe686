//! Secret wrappers that are zeroized on drop.
//!
//! Access and refresh tokens only ever live inside these types so they are
//! cleared from memory once the owning credential goes away and never show
//! up in `Debug` output or logs.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string wrapper that zeroizes its contents on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Bearer token handed to the dispatcher for a single outbound call.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(SecretString);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&SecretString> for BearerToken {
    fn from(secret: &SecretString) -> Self {
        Self(secret.clone())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}
