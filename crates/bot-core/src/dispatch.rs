use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{info, warn};

use crate::events::{
    EventContent, EventKind, EventMetadata, MessageContent, ReactionContent, StrippedStateEvent,
};

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = Result<(), ListenerError>;

/// Callback invoked with an owned copy of the content and the event metadata.
pub type Listener = Arc<dyn Fn(EventContent, &EventMetadata) -> ListenerResult + Send + Sync>;

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners called.
    pub invoked: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Ordered listener lists per event kind. Insertion order is kept, duplicates are allowed.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .listeners
            .iter()
            .map(|(kind, list)| (kind.to_string(), list.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the list for `kind` and hand it back.
    pub fn register(&mut self, kind: EventKind, listener: Listener) -> Listener {
        self.listeners
            .entry(kind)
            .or_default()
            .push(Arc::clone(&listener));
        listener
    }

    pub fn has_listeners(&self, kind: &EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.listeners.get(kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for `kind` in registration order.
    ///
    /// Each listener gets its own clone of `content`. A listener that fails or
    /// panics is logged and skipped; the remaining listeners still run.
    pub fn dispatch(
        &self,
        kind: &EventKind,
        content: &EventContent,
        metadata: &EventMetadata,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(listeners) = self.listeners.get(kind).filter(|list| !list.is_empty()) else {
            info!(%kind, room_id = %metadata.room_id, "skipping event, no listeners");
            return report;
        };

        for (index, listener) in listeners.iter().enumerate() {
            report.invoked += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                listener(content.clone(), metadata)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(%kind, index, event_id = ?metadata.event_id, "listener failed: {err}");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(%kind, index, event_id = ?metadata.event_id, "listener panicked");
                }
            }
        }
        report
    }
}

/// Build a listener from any closure over the full event content.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(EventContent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a message callback as a registry listener.
pub fn message_listener<F>(f: F) -> Listener
where
    F: Fn(MessageContent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
{
    listener(move |content, metadata| match content {
        EventContent::Message(message) => f(message, metadata),
        other => Err(unexpected_content("m.room.message", &other)),
    })
}

pub fn reaction_listener<F>(f: F) -> Listener
where
    F: Fn(ReactionContent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
{
    listener(move |content, metadata| match content {
        EventContent::Reaction(reaction) => f(reaction, metadata),
        other => Err(unexpected_content("m.reaction", &other)),
    })
}

pub fn invite_listener<F>(f: F) -> Listener
where
    F: Fn(StrippedStateEvent, &EventMetadata) -> ListenerResult + Send + Sync + 'static,
{
    listener(move |content, metadata| match content {
        EventContent::Invite(invite) => f(invite, metadata),
        other => Err(unexpected_content("invite", &other)),
    })
}

fn unexpected_content(expected: &str, got: &EventContent) -> ListenerError {
    format!("expected {expected} content, got {got:?}").into()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn message(body: &str) -> EventContent {
        EventContent::Message(MessageContent {
            body: body.into(),
            msgtype: "m.text".into(),
        })
    }

    fn metadata() -> EventMetadata {
        EventMetadata::new("!room:x", "@a:x")
    }

    #[test]
    fn invokes_listeners_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for name in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            registry.register(
                EventKind::Message,
                listener(move |_, _| {
                    calls.lock().expect("calls lock").push(name);
                    Ok(())
                }),
            );
        }

        let report = registry.dispatch(&EventKind::Message, &message("hi"), &metadata());

        assert_eq!(report, DispatchReport { invoked: 3, failed: 0 });
        assert_eq!(
            *calls.lock().expect("calls lock"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn drops_events_without_listeners() {
        let registry = ListenerRegistry::new();
        let report = registry.dispatch(
            &EventKind::Custom("m.room.topic".into()),
            &message("hi"),
            &metadata(),
        );
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn register_returns_the_same_listener_and_allows_duplicates() {
        let mut registry = ListenerRegistry::new();
        let original = listener(|_, _| Ok(()));
        let returned = registry.register(EventKind::Reaction, Arc::clone(&original));
        registry.register(EventKind::Reaction, returned.clone());

        assert!(Arc::ptr_eq(&original, &returned));
        assert_eq!(registry.listener_count(&EventKind::Reaction), 2);
        assert!(!registry.has_listeners(&EventKind::Message));
    }

    #[test]
    fn each_listener_gets_an_unmodified_copy() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.register(
            EventKind::Message,
            message_listener(|mut message, _| {
                message.body.push_str(" (mutated)");
                Ok(())
            }),
        );
        let seen_clone = Arc::clone(&seen);
        registry.register(
            EventKind::Message,
            message_listener(move |message, _| {
                seen_clone.lock().expect("seen lock").push(message.body);
                Ok(())
            }),
        );

        registry.dispatch(&EventKind::Message, &message("hi"), &metadata());
        assert_eq!(*seen.lock().expect("seen lock"), vec!["hi".to_owned()]);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_stop_siblings() {
        let reached = Arc::new(Mutex::new(0));
        let mut registry = ListenerRegistry::new();
        registry.register(EventKind::Message, listener(|_, _| Err("boom".into())));
        registry.register(EventKind::Message, listener(|_, _| panic!("listener bug")));
        let reached_clone = Arc::clone(&reached);
        registry.register(
            EventKind::Message,
            listener(move |_, _| {
                *reached_clone.lock().expect("reached lock") += 1;
                Ok(())
            }),
        );

        let report = registry.dispatch(&EventKind::Message, &message("hi"), &metadata());

        assert_eq!(report, DispatchReport { invoked: 3, failed: 2 });
        assert_eq!(*reached.lock().expect("reached lock"), 1);
    }

    #[test]
    fn typed_listener_rejects_mismatched_content() {
        let on_reaction = reaction_listener(|_, _| Ok(()));
        let err = on_reaction(message("hi"), &metadata()).expect_err("mismatch must fail");
        assert!(err.to_string().starts_with("expected m.reaction content"));
    }
}
