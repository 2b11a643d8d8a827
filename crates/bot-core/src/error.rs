use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ClientLifecycleState;

/// Broad error category used for logging and restart decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by homeserver.
    RateLimited,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Homeserver discovery failed. Fatal to client construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The bot identity is not of the form `@localpart:servername`.
    #[error("invalid user id '{0}': expected @localpart:servername")]
    InvalidUserId(String),
    /// A configured or discovered base URL could not be parsed.
    #[error("invalid homeserver url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    /// The HTTP client used for probing could not be built.
    #[error("http client unavailable: {0}")]
    HttpClient(String),
    /// Neither the direct probe nor `.well-known` delegation produced a homeserver.
    #[error("could not find homeserver (server_name={server_name})")]
    NotFound { server_name: String },
}

impl ResolutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpClient(_) => ErrorCategory::Internal,
            Self::NotFound { .. } => ErrorCategory::Network,
            Self::InvalidUserId(_) | Self::InvalidUrl { .. } => ErrorCategory::Config,
        }
    }
}

/// Failure classes produced by the request executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Every attempt was answered with `429 Too Many Requests`.
    #[error("did not manage to make request after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    /// `401`/`403` with a Matrix `{errcode, error}` body. Never retried.
    #[error("{errcode}: {message}")]
    Unauthorized { errcode: String, message: String },
    /// Any other status/body combination.
    #[error("unknown response: status={status}: body={body}")]
    UnknownResponse { status: u16, body: String },
    /// The request never produced an HTTP response.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RequestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimitExhausted { .. } => ErrorCategory::RateLimited,
            Self::Unauthorized { .. } => ErrorCategory::Auth,
            Self::UnknownResponse { status, .. } => classify_http_status(*status),
            Self::Transport(_) => ErrorCategory::Network,
        }
    }

    /// Stable machine-readable code. For `Unauthorized` this is the server `errcode`.
    pub fn code(&self) -> &str {
        match self {
            Self::RateLimitExhausted { .. } => "rate_limit_exhausted",
            Self::Unauthorized { errcode, .. } => errcode,
            Self::UnknownResponse { .. } => "unknown_response",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// A room, event or response body did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

impl DecodeError {
    pub fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            reason: reason.into(),
        }
    }
}

/// A lifecycle operation was attempted from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot run '{action}' while client is in state {state:?}")]
pub struct InvalidStateError {
    pub state: ClientLifecycleState,
    pub action: String,
}

impl InvalidStateError {
    pub fn new(state: ClientLifecycleState, action: impl Into<String>) -> Self {
        Self {
            state,
            action: action.into(),
        }
    }
}

/// Login, refresh or token restore was rejected. Not fatal; callers may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("m.login.password not supported (flows: {flows})")]
    PasswordLoginUnsupported { flows: String },
    #[error("homeserver assigned device '{returned}' but '{requested}' was requested")]
    DeviceMismatch { requested: String, returned: String },
    #[error("malformed auth response: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
}

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Request(err) => err.category(),
            Self::Decode(_) => ErrorCategory::Serialization,
            Self::InvalidState(_) => ErrorCategory::Internal,
            Self::PasswordLoginUnsupported { .. } | Self::DeviceMismatch { .. } => {
                ErrorCategory::Auth
            }
        }
    }
}

/// Reasons a sync cycle (and therefore the sync loop) stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The sync body itself (not a single room or event) was unusable.
    #[error("malformed sync response: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Request(err) => err.category(),
            Self::Decode(_) => ErrorCategory::Serialization,
            Self::InvalidState(_) => ErrorCategory::Internal,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Request(err) => err.code(),
            Self::Decode(_) => "malformed_sync_response",
            Self::InvalidState(_) => "invalid_state_transition",
        }
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        // a success status that still failed can only be a body problem
        200..=299 => ErrorCategory::Serialization,
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(200), ErrorCategory::Serialization);
        assert_eq!(classify_http_status(401), ErrorCategory::Auth);
        assert_eq!(classify_http_status(429), ErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), ErrorCategory::Config);
        assert_eq!(classify_http_status(503), ErrorCategory::Network);
        assert_eq!(classify_http_status(700), ErrorCategory::Internal);
    }

    #[test]
    fn unauthorized_code_is_the_server_errcode() {
        let err = RequestError::Unauthorized {
            errcode: "M_UNKNOWN_TOKEN".into(),
            message: "Invalid access token".into(),
        };
        assert_eq!(err.code(), "M_UNKNOWN_TOKEN");
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert_eq!(err.to_string(), "M_UNKNOWN_TOKEN: Invalid access token");
    }

    #[test]
    fn unknown_response_category_follows_status() {
        let err = RequestError::UnknownResponse {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.code(), "unknown_response");
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let err = RequestError::RateLimitExhausted { attempts: 6 };
        assert_eq!(
            err.to_string(),
            "did not manage to make request after 6 attempts"
        );
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err: SyncError =
            InvalidStateError::new(ClientLifecycleState::Unauthenticated, "run").into();
        assert_eq!(err.code(), "invalid_state_transition");
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn auth_error_inherits_request_category() {
        let err = AuthError::from(RequestError::RateLimitExhausted { attempts: 2 });
        assert_eq!(err.category(), ErrorCategory::RateLimited);
    }
}
