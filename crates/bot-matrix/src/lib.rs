//! Network side of the Matrix bot: homeserver discovery, rate-limit aware
//! request execution and the long-poll sync loop.

mod client;
mod executor;
mod resolver;
mod sync;

use bot_core::{RetryPolicy, SyncSettings};

pub use client::MatrixBot;
pub use executor::{ApiRequest, RequestExecutor, ResponseOutcome, classify_response};
pub use resolver::{HomeserverResolver, api_base_url};

/// Everything needed to construct a [`MatrixBot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// Fully-qualified `@localpart:servername`.
    pub user_id: String,
    /// Known homeserver base URL; skips discovery when set.
    pub homeserver: Option<String>,
    /// Allow `http` homeservers. Only meant for local test servers.
    pub allow_insecure_http: bool,
    pub sync: SyncSettings,
    pub retry: RetryPolicy,
}

impl BotConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            homeserver: None,
            allow_insecure_http: false,
            sync: SyncSettings::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_homeserver(mut self, homeserver: impl Into<String>) -> Self {
        self.homeserver = Some(homeserver.into());
        self
    }

    pub fn with_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    pub fn with_sync_settings(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use bot_core::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SYNC_TIMEOUT_MS};

    use super::*;

    #[test]
    fn config_defaults_follow_sync_and_retry_defaults() {
        let config = BotConfig::new("@bot:example.org");
        assert_eq!(config.homeserver, None);
        assert!(!config.allow_insecure_http);
        assert_eq!(config.sync.timeout_ms, DEFAULT_SYNC_TIMEOUT_MS);
        assert_eq!(config.retry.max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = BotConfig::new("@bot:example.org")
            .with_homeserver("http://127.0.0.1:8008")
            .with_insecure_http(true)
            .with_retry_policy(RetryPolicy::new(2, 5));
        assert_eq!(config.homeserver.as_deref(), Some("http://127.0.0.1:8008"));
        assert!(config.allow_insecure_http);
        assert_eq!(config.retry.max_attempts(), 2);
    }
}
