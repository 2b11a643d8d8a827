use tokio::sync::broadcast;

use crate::types::BotEvent;

/// Broadcast stream type used by status subscribers.
pub type StatusStream = broadcast::Receiver<BotEvent>;

/// Fan-out of lifecycle and sync status events to any number of observers.
#[derive(Clone, Debug)]
pub struct StatusChannel {
    event_tx: broadcast::Sender<BotEvent>,
}

impl StatusChannel {
    pub fn new(buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer.max(1));
        Self { event_tx }
    }

    pub fn subscribe(&self) -> StatusStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; having no subscribers is not an error and
    /// lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: BotEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientLifecycleState, SyncStatus};

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let channel = StatusChannel::new(16);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        channel.emit(BotEvent::StateChanged {
            state: ClientLifecycleState::Syncing,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_harmless() {
        let channel = StatusChannel::new(0);
        channel.emit(BotEvent::SyncStatus(SyncStatus {
            running: false,
            cursor: None,
        }));

        let mut late = channel.subscribe();
        channel.emit(BotEvent::SyncStopped {
            error_code: None,
            message: None,
        });
        assert!(matches!(
            late.recv().await,
            Ok(BotEvent::SyncStopped { .. })
        ));
    }
}
