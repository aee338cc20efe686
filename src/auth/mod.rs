//! Azure AD authentication module.
//!
//! Provides the OAuth2 device code flow, a file-backed credential lifecycle
//! with silent refresh, and the bearer tokens used by the Graph dispatcher.

pub mod clock;
pub mod credential;
pub mod credential_manager;
pub mod device_code;
pub mod oauth;
pub mod secure;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock};
pub use credential_manager::{CredentialManager, CredentialState};
pub use device_code::{DeviceCodeAuthenticator, DeviceCodeSession, PollStatus, SignInPrompt, StderrPrompt};
pub use oauth::{IdentityProvider, OAuth2Client};
pub use secure::BearerToken;
