use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    decode::{
        SyncResponse, decode_content, decode_envelope, decode_invited_room, decode_joined_room,
        decode_stripped_state,
    },
    dispatch::ListenerRegistry,
    events::{EventContent, EventKind, MEMBER_EVENT_TYPE},
};

/// Counters for one processed sync response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events handed to at least one listener.
    pub dispatched: usize,
    /// Events dropped because nobody listens for their kind.
    pub skipped: usize,
    /// Rooms or events that could not be decoded.
    pub decode_failures: usize,
    /// Listener invocations that failed.
    pub listener_failures: usize,
}

/// Decode every joined and invited room of `response` and dispatch its events.
///
/// Timeline events of one room are dispatched in server order. A room or event
/// that fails to decode is logged and skipped without affecting its siblings.
pub fn process_sync_response(registry: &ListenerRegistry, response: &SyncResponse) -> SyncReport {
    let mut report = SyncReport {
        decode_failures: response.malformed_sections.len(),
        ..SyncReport::default()
    };

    for (room_id, raw_room) in &response.rooms.join {
        match decode_joined_room(raw_room) {
            Ok(room) => {
                if room.timeline.limited {
                    debug!(%room_id, prev_batch = ?room.timeline.prev_batch, "timeline was limited");
                }
                for raw_event in &room.timeline.events {
                    process_timeline_event(registry, room_id, raw_event, &mut report);
                }
            }
            Err(err) => {
                report.decode_failures += 1;
                warn!(%room_id, %err, "skipping undecodable joined room");
            }
        }
    }

    for (room_id, raw_room) in &response.rooms.invite {
        match decode_invited_room(raw_room) {
            Ok(room) => {
                for raw_event in &room.invite_state.events {
                    process_invite_event(registry, room_id, raw_event, &mut report);
                }
            }
            Err(err) => {
                report.decode_failures += 1;
                warn!(%room_id, %err, "skipping undecodable invited room");
            }
        }
    }

    report
}

fn process_timeline_event(
    registry: &ListenerRegistry,
    room_id: &str,
    raw_event: &Value,
    report: &mut SyncReport,
) {
    let event = match decode_envelope(room_id, raw_event) {
        Ok(event) => event,
        Err(err) => {
            report.decode_failures += 1;
            warn!(%room_id, %err, "skipping unknown event on timeline: {raw_event}");
            return;
        }
    };

    let kind = event.kind();
    if !registry.has_listeners(&kind) {
        report.skipped += 1;
        info!(%room_id, %kind, "skipping event, no listeners");
        return;
    }

    let content = match decode_content(&kind, &event.event_type, event.content) {
        Ok(content) => content,
        Err(err) => {
            report.decode_failures += 1;
            warn!(%room_id, %kind, event_id = ?event.metadata.event_id, %err, "skipping undecodable event");
            return;
        }
    };

    let dispatch = registry.dispatch(&kind, &content, &event.metadata);
    report.dispatched += 1;
    report.listener_failures += dispatch.failed;
}

fn process_invite_event(
    registry: &ListenerRegistry,
    room_id: &str,
    raw_event: &Value,
    report: &mut SyncReport,
) {
    let event_type = raw_event.get("type").and_then(Value::as_str);
    if event_type != Some(MEMBER_EVENT_TYPE) {
        report.skipped += 1;
        debug!(%room_id, ?event_type, "ignoring non-membership invite state");
        return;
    }
    if !registry.has_listeners(&EventKind::Invite) {
        report.skipped += 1;
        info!(%room_id, "skipping invite, no listeners");
        return;
    }

    match decode_stripped_state(room_id, raw_event) {
        Ok((event, metadata)) => {
            let dispatch =
                registry.dispatch(&EventKind::Invite, &EventContent::Invite(event), &metadata);
            report.dispatched += 1;
            report.listener_failures += dispatch.failed;
        }
        Err(err) => {
            report.decode_failures += 1;
            warn!(%room_id, %err, "skipping undecodable invite state");
        }
    }
}
