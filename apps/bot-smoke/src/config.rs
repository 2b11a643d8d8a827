//! Environment-backed configuration for `bot-smoke`.

use std::{env, error::Error, fmt};

use bot_core::{
    DEFAULT_INITIAL_SYNC_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_SYNC_TIMEOUT_MS, RetryPolicy,
    SyncSettings,
};
use bot_matrix::BotConfig;

const BASE_BACKOFF_MS: u64 = 1;

/// Runtime configuration of the smoke bot.
#[derive(Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub user_id: String,
    pub password: String,
    pub device_id: Option<String>,
    /// Skips `.well-known` discovery when set.
    pub homeserver: Option<String>,
    pub allow_insecure_http: bool,
    /// Ask for full state on the first sync.
    pub full_sync: bool,
    pub initial_sync_timeout_ms: u64,
    pub sync_timeout_ms: u64,
    pub max_retries: u32,
}

impl fmt::Debug for SmokeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmokeConfig")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("homeserver", &self.homeserver)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .field("full_sync", &self.full_sync)
            .field("initial_sync_timeout_ms", &self.initial_sync_timeout_ms)
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let user_id = required_trimmed_env("MATRIX_BOT_USER", &mut lookup)?;
        let password = lookup("MATRIX_BOT_PASSWORD")
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::Missing {
                key: "MATRIX_BOT_PASSWORD",
            })?;
        let device_id = optional_trimmed_env("MATRIX_BOT_DEVICE_ID", &mut lookup);
        let homeserver = optional_trimmed_env("MATRIX_BOT_HOMESERVER", &mut lookup);
        let allow_insecure_http =
            parse_bool_with_default("MATRIX_BOT_ALLOW_INSECURE_HTTP", false, &mut lookup)?;
        let full_sync = parse_bool_with_default("MATRIX_BOT_FULL_SYNC", true, &mut lookup)?;
        let initial_sync_timeout_ms = parse_u64_with_default(
            "MATRIX_BOT_INITIAL_SYNC_TIMEOUT_MS",
            DEFAULT_INITIAL_SYNC_TIMEOUT_MS,
            &mut lookup,
        )?;
        let sync_timeout_ms =
            parse_u64_with_default("MATRIX_BOT_SYNC_TIMEOUT_MS", DEFAULT_SYNC_TIMEOUT_MS, &mut lookup)?;
        let max_retries = parse_u32_with_default(
            "MATRIX_BOT_MAX_RETRIES",
            DEFAULT_MAX_ATTEMPTS,
            &mut lookup,
        )?;

        if max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MATRIX_BOT_MAX_RETRIES",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            user_id,
            password,
            device_id,
            homeserver,
            allow_insecure_http,
            full_sync,
            initial_sync_timeout_ms,
            sync_timeout_ms,
            max_retries,
        })
    }

    pub fn bot_config(&self) -> BotConfig {
        let mut config = BotConfig::new(self.user_id.clone())
            .with_insecure_http(self.allow_insecure_http)
            .with_sync_settings(SyncSettings {
                initial_timeout_ms: self.initial_sync_timeout_ms,
                timeout_ms: self.sync_timeout_ms,
            })
            .with_retry_policy(RetryPolicy::new(self.max_retries, BASE_BACKOFF_MS));
        if let Some(homeserver) = &self.homeserver {
            config = config.with_homeserver(homeserver.clone());
        }
        config
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_bool_with_default<F>(
    key: &'static str,
    default: bool,
    lookup: &mut F,
) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}

fn parse_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<u64>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_u32_with_default<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<u32>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
