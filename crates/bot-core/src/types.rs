use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;

/// Default `/sync` timeout for the first (initial) request, in milliseconds.
pub const DEFAULT_INITIAL_SYNC_TIMEOUT_MS: u64 = 5_000;
/// Default `/sync` long-poll timeout for follow-up requests, in milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 3_000;

/// Client lifecycle state reported to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientLifecycleState {
    /// No login has succeeded yet.
    Unauthenticated,
    /// A login or token restore is in flight.
    Authenticating,
    /// Tokens are present and the sync loop is idle.
    Authenticated,
    /// The sync loop is running.
    Syncing,
    /// The sync loop ended, either by cancellation or an unrecoverable error.
    Stopped,
}

/// Fully-qualified Matrix user identifier, `@localpart:servername`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId {
    full: String,
    colon: usize,
}

impl UserId {
    pub fn parse(value: impl Into<String>) -> Result<Self, ResolutionError> {
        let full = value.into();
        let colon = match (full.strip_prefix('@'), full.find(':')) {
            (Some(_), Some(colon)) if colon > 1 && colon + 1 < full.len() => colon,
            _ => return Err(ResolutionError::InvalidUserId(full)),
        };
        Ok(Self { full, colon })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn localpart(&self) -> &str {
        &self.full[1..self.colon]
    }

    /// Everything after the first `:`, which may include a port.
    pub fn server_name(&self) -> &str {
        &self.full[self.colon + 1..]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Long-poll tuning for the sync loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    /// Server-side timeout for the initial request, which carries no cursor.
    pub initial_timeout_ms: u64,
    /// Server-side timeout for every request after the first.
    pub timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DEFAULT_INITIAL_SYNC_TIMEOUT_MS,
            timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        }
    }
}

/// Sync loop status updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether the loop is currently running.
    pub running: bool,
    /// Last `next_batch` cursor received, if any.
    pub cursor: Option<String>,
}

/// Status events broadcast to observers of a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BotEvent {
    /// Lifecycle transition.
    StateChanged {
        /// New lifecycle state.
        state: ClientLifecycleState,
    },
    /// Sync loop progress.
    SyncStatus(SyncStatus),
    /// The sync loop returned control to its caller.
    SyncStopped {
        /// Stable error code when the loop ended on a failure, `None` when cancelled.
        error_code: Option<String>,
        /// Human-readable failure message.
        message: Option<String>,
    },
}
