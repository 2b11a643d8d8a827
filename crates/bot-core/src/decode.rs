//! Pure conversions from raw JSON payloads into typed sync and event shapes.
//!
//! Decoding is permissive: unknown keys are ignored and missing optional keys
//! become `None`. Rooms and events are kept as raw values inside the sync
//! partition so that one malformed item can be skipped without losing its siblings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    error::DecodeError,
    events::{EventContent, EventKind, EventMetadata, StrippedStateEvent},
};

/// Deserialize `value` as `T`, reporting failures against `what`.
pub fn decode_value<'a, T>(what: &'static str, value: &'a Value) -> Result<T, DecodeError>
where
    T: Deserialize<'a>,
{
    T::deserialize(value).map_err(|err| DecodeError::invalid(what, err.to_string()))
}

/// Top-level `/sync` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResponse {
    pub next_batch: String,
    /// Servers omit the section entirely when nothing changed.
    pub rooms: Rooms,
    /// Sections that were present but not objects, and were decoded as empty.
    pub malformed_sections: Vec<&'static str>,
}

/// Room partition of a sync body. Both maps are always present once decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rooms {
    pub invite: BTreeMap<String, Value>,
    pub join: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Timeline {
    /// Raw envelopes in server order.
    #[serde(default)]
    pub events: Vec<Value>,
    /// `true` when the server truncated the timeline.
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub prev_batch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: InviteState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InviteState {
    /// Raw stripped state envelopes in server order.
    #[serde(default)]
    pub events: Vec<Value>,
}

/// One timeline envelope split into its type, raw content and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: String,
    pub content: Value,
    pub metadata: EventMetadata,
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from_event_type(&self.event_type)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
    content: Option<Value>,
    sender: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    origin_server_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    unsigned: Option<Map<String, Value>>,
}

/// Decode a `/sync` body. Only `next_batch` is required.
///
/// A `rooms`, `rooms.invite` or `rooms.join` section that is not an object is
/// logged, recorded in `malformed_sections` and treated as empty, so the cursor
/// and the sibling section survive.
pub fn decode_sync_response(body: &Value) -> Result<SyncResponse, DecodeError> {
    let next_batch = match body.get("next_batch") {
        None | Some(Value::Null) => return Err(DecodeError::MissingField("next_batch")),
        Some(Value::String(next_batch)) => next_batch.clone(),
        Some(other) => {
            return Err(DecodeError::invalid(
                "next_batch",
                format!("expected a string, got {other}"),
            ));
        }
    };

    let mut response = SyncResponse {
        next_batch,
        ..SyncResponse::default()
    };
    let malformed = &mut response.malformed_sections;
    if let Some(rooms) = section(body.get("rooms"), "rooms", malformed) {
        response.rooms.invite = section(rooms.get("invite"), "rooms.invite", malformed)
            .map(to_room_map)
            .unwrap_or_default();
        response.rooms.join = section(rooms.get("join"), "rooms.join", malformed)
            .map(to_room_map)
            .unwrap_or_default();
    }
    Ok(response)
}

fn section<'a>(
    value: Option<&'a Value>,
    name: &'static str,
    malformed: &mut Vec<&'static str>,
) -> Option<&'a Map<String, Value>> {
    match value? {
        Value::Object(map) => Some(map),
        other => {
            warn!(section = name, "ignoring malformed sync section: {other}");
            malformed.push(name);
            None
        }
    }
}

fn to_room_map(rooms: &Map<String, Value>) -> BTreeMap<String, Value> {
    rooms
        .iter()
        .map(|(room_id, room)| (room_id.clone(), room.clone()))
        .collect()
}

pub fn decode_joined_room(room: &Value) -> Result<JoinedRoom, DecodeError> {
    decode_value("joined room", room)
}

pub fn decode_invited_room(room: &Value) -> Result<InvitedRoom, DecodeError> {
    decode_value("invited room", room)
}

/// Split a timeline envelope, injecting `room_id` into its metadata.
pub fn decode_envelope(room_id: &str, raw: &Value) -> Result<RawEvent, DecodeError> {
    let envelope: Envelope = decode_value("event envelope", raw)?;
    let event_type = envelope
        .event_type
        .ok_or(DecodeError::MissingField("type"))?;
    let content = envelope.content.ok_or(DecodeError::MissingField("content"))?;
    let sender = envelope.sender.ok_or(DecodeError::MissingField("sender"))?;

    Ok(RawEvent {
        event_type,
        content,
        metadata: EventMetadata {
            room_id: room_id.to_owned(),
            sender,
            event_id: envelope.event_id,
            origin_server_ts: envelope.origin_server_ts,
            unsigned: envelope.unsigned.unwrap_or_default(),
        },
    })
}

/// Decode content into the schema selected by `kind`.
///
/// `Custom` kinds carry no schema and pass the content through as-is.
pub fn decode_content(
    kind: &EventKind,
    event_type: &str,
    content: Value,
) -> Result<EventContent, DecodeError> {
    match kind {
        EventKind::Message => decode_value("m.room.message content", &content)
            .map(EventContent::Message),
        EventKind::Reaction => {
            decode_value("m.reaction content", &content).map(EventContent::Reaction)
        }
        EventKind::Invite => Err(DecodeError::invalid(
            "event kind",
            "invites are decoded from stripped state",
        )),
        EventKind::Custom(_) => Ok(EventContent::Other {
            event_type: event_type.to_owned(),
            content,
        }),
    }
}

/// Decode one stripped state envelope from an invited room.
pub fn decode_stripped_state(
    room_id: &str,
    raw: &Value,
) -> Result<(StrippedStateEvent, EventMetadata), DecodeError> {
    let event: StrippedStateEvent = decode_value("stripped state event", raw)?;
    let envelope = decode_envelope(room_id, raw)?;
    Ok((event, envelope.metadata))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::MessageContent;

    #[test]
    fn sync_without_rooms_has_empty_partition() {
        let response =
            decode_sync_response(&json!({"next_batch": "b1"})).expect("sync decodes");
        assert_eq!(response.next_batch, "b1");
        assert!(response.rooms.invite.is_empty());
        assert!(response.rooms.join.is_empty());
    }

    #[test]
    fn sync_with_only_join_gets_empty_invite() {
        let response = decode_sync_response(&json!({
            "next_batch": "b2",
            "rooms": {"join": {"!r:x": {}}, "leave": {"!gone:x": {}}},
            "presence": {"events": []}
        }))
        .expect("sync decodes");
        assert!(response.rooms.invite.is_empty());
        assert_eq!(response.rooms.join.len(), 1);
    }

    #[test]
    fn malformed_sections_decode_as_empty_and_keep_cursor() {
        let response = decode_sync_response(&json!({
            "next_batch": "b9",
            "rooms": {"invite": null, "join": {"!r:x": {}}}
        }))
        .expect("cursor survives a null invite section");
        assert_eq!(response.next_batch, "b9");
        assert!(response.rooms.invite.is_empty());
        assert_eq!(response.rooms.join.len(), 1);
        assert_eq!(response.malformed_sections, vec!["rooms.invite"]);

        let response = decode_sync_response(&json!({
            "next_batch": "b10",
            "rooms": {"join": [], "invite": {"!i:x": {}}}
        }))
        .expect("cursor survives a list join section");
        assert!(response.rooms.join.is_empty());
        assert_eq!(response.rooms.invite.len(), 1);
        assert_eq!(response.malformed_sections, vec!["rooms.join"]);

        let response = decode_sync_response(&json!({"next_batch": "b11", "rooms": null}))
            .expect("cursor survives null rooms");
        assert_eq!(response.next_batch, "b11");
        assert_eq!(response.rooms, Rooms::default());
        assert_eq!(response.malformed_sections, vec!["rooms"]);
    }

    #[test]
    fn non_string_cursor_is_a_decode_error() {
        let err = decode_sync_response(&json!({"next_batch": 7})).expect_err("must fail");
        assert!(matches!(err, DecodeError::Invalid { what: "next_batch", .. }));
    }

    #[test]
    fn sync_without_cursor_is_a_decode_error() {
        let err = decode_sync_response(&json!({"rooms": {}})).expect_err("must fail");
        assert_eq!(err, DecodeError::MissingField("next_batch"));
    }

    #[test]
    fn joined_room_without_timeline_is_empty() {
        let room = decode_joined_room(&json!({"ephemeral": {"events": []}}))
            .expect("room decodes");
        assert!(room.timeline.events.is_empty());
        assert!(!room.timeline.limited);
    }

    #[test]
    fn envelope_metadata_converts_timestamp_and_injects_room() {
        let raw = json!({
            "type": "m.room.message",
            "content": {"body": "hi", "msgtype": "m.text"},
            "event_id": "$1",
            "sender": "@a:x",
            "origin_server_ts": 1_700_000_000_000_i64,
            "unsigned": {"age": 12}
        });
        let event = decode_envelope("!room:x", &raw).expect("envelope decodes");

        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(event.metadata.room_id, "!room:x");
        assert_eq!(event.metadata.sender, "@a:x");
        assert_eq!(event.metadata.event_id.as_deref(), Some("$1"));
        assert_eq!(
            event.metadata.origin_server_ts.map(|ts| ts.to_rfc3339()),
            Some("2023-11-14T22:13:20+00:00".to_owned())
        );
        assert_eq!(event.metadata.unsigned.get("age"), Some(&json!(12)));

        let content = decode_content(&event.kind(), &event.event_type, event.content)
            .expect("content decodes");
        assert_eq!(
            content,
            EventContent::Message(MessageContent {
                body: "hi".into(),
                msgtype: "m.text".into()
            })
        );
    }

    #[test]
    fn envelope_without_content_is_rejected() {
        let err = decode_envelope("!r:x", &json!({"type": "m.room.message", "sender": "@a:x"}))
            .expect_err("must fail");
        assert_eq!(err, DecodeError::MissingField("content"));
    }

    #[test]
    fn message_without_body_is_a_decode_error() {
        let err = decode_content(&EventKind::Message, "m.room.message", json!({"msgtype": "m.text"}))
            .expect_err("must fail");
        assert!(matches!(err, DecodeError::Invalid { what: "m.room.message content", .. }));
    }

    #[test]
    fn custom_content_passes_through() {
        let kind = EventKind::Custom("org.example.ping".into());
        let content = decode_content(&kind, "org.example.ping", json!({"n": 1}))
            .expect("custom decodes");
        assert_eq!(
            content,
            EventContent::Other {
                event_type: "org.example.ping".into(),
                content: json!({"n": 1})
            }
        );
    }

    #[test]
    fn stripped_state_decodes_membership() {
        let raw = json!({
            "type": "m.room.member",
            "state_key": "@bot:x",
            "sender": "@n:x",
            "content": {"membership": "invite", "displayname": "bot", "is_direct": true}
        });
        let (event, metadata) = decode_stripped_state("!inv:x", &raw).expect("decodes");
        assert_eq!(event.content.membership, "invite");
        assert_eq!(event.content.is_direct, Some(true));
        assert_eq!(event.content.reason, None);
        assert_eq!(metadata.room_id, "!inv:x");
        assert_eq!(metadata.sender, "@n:x");
        assert_eq!(metadata.event_id, None);
    }
}
