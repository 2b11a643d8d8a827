use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Token store shared between the login handlers and the request executor.
pub type SharedTokenStore = Arc<RwLock<TokenStore>>;

/// Token fields of a login or refresh response. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in milliseconds, relative to issue time.
    #[serde(default)]
    pub expires_in_ms: Option<u64>,
}

impl TokenResponse {
    pub fn expiry_from(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lifetime = self.expires_in_ms?;
        self.access_token.as_ref()?;
        let lifetime = Duration::try_milliseconds(i64::try_from(lifetime).ok()?)?;
        issued_at.checked_add_signed(lifetime)
    }
}

/// Body of a successful `POST client/v3/login`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub device_id: String,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

/// Current access/refresh tokens and the derived access token expiry.
///
/// Starts empty with no expiry, so "no token" is distinguishable from
/// "token known to be expired".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedTokenStore {
        Arc::new(RwLock::new(self))
    }

    pub fn apply(&mut self, tokens: &TokenResponse) {
        self.apply_at(tokens, Utc::now());
    }

    /// Each field is only replaced when present in `tokens`; a refresh-only
    /// result keeps the current access token.
    pub fn apply_at(&mut self, tokens: &TokenResponse, now: DateTime<Utc>) {
        if let Some(access_token) = &tokens.access_token {
            self.access_token = Some(access_token.clone());
            self.expires_at = tokens.expiry_from(now);
        }
        if let Some(refresh_token) = &tokens.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
    }

    /// Install an access token of unknown lifetime.
    pub fn set_access_token(&mut self, access_token: impl Into<String>) {
        self.access_token = Some(access_token.into());
        self.expires_at = None;
    }

    pub fn clear_access_token(&mut self) {
        self.access_token = None;
        self.expires_at = None;
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// `None` means the current token (if any) never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Informational only; nothing refreshes automatically.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.access_token
            .as_deref()
            .map(|token| format!("Bearer {token}"))
    }
}
