//! Dispatcher wired to a mock identity provider and a wiremock Graph server.

use std::sync::Arc;

use chrono::Duration;
use wiremock::MockServer;

use crate::auth::testing::{MockClock, MockProvider, RecordingPrompt};
use crate::auth::{Clock, CredentialManager};
use crate::config::Config;
use crate::graph::Dispatcher;
use crate::token_cache::{CachedTokenRecord, TokenCacheStore};

/// Holds a valid cached token "cached" (refresh token "refresh-0").
pub struct DispatcherHarness {
    _dir: tempfile::TempDir,
    pub provider: Arc<MockProvider>,
    pub dispatcher: Arc<Dispatcher>,
}

impl DispatcherHarness {
    pub fn new(server: &MockServer) -> Self {
        Self::with_timeout(server, 30)
    }

    pub fn with_timeout(server: &MockServer, timeout_seconds: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenCacheStore::new(dir.path().join("token_cache.json"));
        let clock = Arc::new(MockClock::new());
        store
            .save(&CachedTokenRecord::new(
                "cached".into(),
                Some("refresh-0".into()),
                clock.now() + Duration::hours(1),
                None,
                vec![
                    "User.Read".into(),
                    "Mail.ReadWrite".into(),
                    "Calendars.Read".into(),
                    "Calendars.Read.Shared".into(),
                ],
            ))
            .unwrap();

        let provider = Arc::new(MockProvider::new());
        let credentials = Arc::new(CredentialManager::new(
            provider.clone(),
            store,
            clock,
            Arc::new(RecordingPrompt::default()),
        ));

        let mut config = Config::embedded().unwrap();
        config.api.graph_base_url = server.uri();
        config.api.timeout_seconds = timeout_seconds;

        Self {
            _dir: dir,
            provider,
            dispatcher: Arc::new(Dispatcher::new(&config, credentials).unwrap()),
        }
    }
}
