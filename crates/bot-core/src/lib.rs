//! Core contract of the Matrix bot sync engine.
//!
//! This crate holds everything that does not touch the network: the error
//! taxonomy, retry policy, lifecycle model, token store, typed events, the
//! response decoder and the listener registry/dispatcher.

/// Broadcast channel for lifecycle and sync status.
pub mod channel;
/// Permissive decoding of sync bodies, rooms and event envelopes.
pub mod decode;
/// Listener registry and per-event fan-out.
pub mod dispatch;
/// Error taxonomy and HTTP classification helpers.
pub mod error;
/// Typed event content and metadata.
pub mod events;
/// Backoff policy used when rate limited.
pub mod retry;
/// Client lifecycle state machine.
pub mod state_machine;
/// Routing of a decoded sync response to listeners.
pub mod sync;
/// Access/refresh token store.
pub mod tokens;
/// Identity, settings and status types.
pub mod types;

pub use channel::{StatusChannel, StatusStream};
pub use decode::{
    InviteState, InvitedRoom, JoinedRoom, RawEvent, Rooms, SyncResponse, Timeline,
    decode_sync_response, decode_value,
};
pub use dispatch::{
    DispatchReport, Listener, ListenerError, ListenerRegistry, ListenerResult, invite_listener,
    listener, message_listener, reaction_listener,
};
pub use error::{
    AuthError, DecodeError, ErrorCategory, InvalidStateError, RequestError, ResolutionError,
    SyncError, classify_http_status,
};
pub use events::{
    EventContent, EventKind, EventMetadata, MembershipContent, MessageContent, ReactionContent,
    RelatesTo, StrippedStateEvent,
};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use state_machine::SyncStateMachine;
pub use sync::{SyncReport, process_sync_response};
pub use tokens::{LoginResponse, SharedTokenStore, TokenResponse, TokenStore};
pub use types::{
    BotEvent, ClientLifecycleState, DEFAULT_INITIAL_SYNC_TIMEOUT_MS, DEFAULT_SYNC_TIMEOUT_MS,
    SyncSettings, SyncStatus, UserId,
};
