//! Strongly-shaped event values handed to listeners.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timeline type routed to [`EventKind::Message`].
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";
/// Timeline type routed to [`EventKind::Reaction`].
pub const REACTION_EVENT_TYPE: &str = "m.reaction";
/// Stripped state type that marks an invite in the `invite` section.
pub const MEMBER_EVENT_TYPE: &str = "m.room.member";

/// Listener registry key.
///
/// `Invite` has no event type string: invites arrive as stripped `m.room.member`
/// state in the `invite` section, and must not be confused with
/// `Custom("m.room.member")` timeline events of joined rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Reaction,
    Invite,
    /// Any other timeline event type, matched literally.
    Custom(String),
}

impl EventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            MESSAGE_EVENT_TYPE => Self::Message,
            REACTION_EVENT_TYPE => Self::Reaction,
            other => Self::Custom(other.to_owned()),
        }
    }

    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Message => Some(MESSAGE_EVENT_TYPE),
            Self::Reaction => Some(REACTION_EVENT_TYPE),
            Self::Invite => None,
            Self::Custom(event_type) => Some(event_type),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_type() {
            Some(event_type) => f.write_str(event_type),
            None => f.write_str("<invite>"),
        }
    }
}

/// `m.room.message` content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    /// e.g. `Hello World`
    pub body: String,
    /// e.g. `m.text`
    pub msgtype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatesTo {
    pub event_id: String,
    /// The reaction itself, usually an emoji.
    pub key: String,
    /// `m.annotation` for reactions.
    pub rel_type: String,
}

/// `m.reaction` content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionContent {
    /// Custom-emoji shortcode, absent for plain unicode reactions.
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(rename = "m.relates_to")]
    pub relation: RelatesTo,
}

/// `m.room.member` content as carried by stripped invite state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipContent {
    /// One of `invite`, `join`, `knock`, `leave`, `ban`.
    pub membership: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub is_direct: Option<bool>,
    #[serde(default)]
    pub join_authorised_via_users_server: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A reduced state event delivered for rooms the bot is only invited to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrippedStateEvent {
    pub content: MembershipContent,
    pub sender: String,
    pub state_key: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Decoded event content, discriminated by the envelope `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventContent {
    Message(MessageContent),
    Reaction(ReactionContent),
    Invite(StrippedStateEvent),
    /// Content of a type without a dedicated schema, passed through untouched.
    Other { event_type: String, content: Value },
}

/// Envelope fields delivered alongside every event's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub room_id: String,
    pub sender: String,
    pub event_id: Option<String>,
    pub origin_server_ts: Option<DateTime<Utc>>,
    pub unsigned: Map<String, Value>,
}

impl EventMetadata {
    /// Metadata with no optional fields set and a fresh, empty `unsigned` map.
    pub fn new(room_id: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            event_id: None,
            origin_server_ts: None,
            unsigned: Map::new(),
        }
    }
}
