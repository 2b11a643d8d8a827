use crate::{
    error::InvalidStateError,
    types::{BotEvent, ClientLifecycleState},
};

/// Tracks the client lifecycle and the sync cursor.
///
/// `Unauthenticated -> Authenticated -> Syncing(cursor) -> Syncing(cursor') -> ... -> Stopped`.
/// Only one sync loop may be active: `start_sync` from `Syncing` is rejected.
#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    state: ClientLifecycleState,
    before_auth: ClientLifecycleState,
    cursor: Option<String>,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self {
            state: ClientLifecycleState::Unauthenticated,
            before_auth: ClientLifecycleState::Unauthenticated,
            cursor: None,
        }
    }
}

impl SyncStateMachine {
    pub fn state(&self) -> ClientLifecycleState {
        self.state
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn begin_auth(&mut self) -> Result<BotEvent, InvalidStateError> {
        use ClientLifecycleState::*;

        if !matches!(self.state, Unauthenticated | Authenticated | Stopped) {
            return Err(InvalidStateError::new(self.state, "login"));
        }
        self.before_auth = self.state;
        Ok(self.transition(Authenticating))
    }

    /// A failed attempt returns to the state held before `begin_auth`,
    /// since previously stored tokens are left untouched.
    pub fn on_auth_result(&mut self, success: bool) -> Result<BotEvent, InvalidStateError> {
        if self.state != ClientLifecycleState::Authenticating {
            return Err(InvalidStateError::new(self.state, "on_auth_result"));
        }

        let next = if success {
            ClientLifecycleState::Authenticated
        } else {
            self.before_auth
        };
        Ok(self.transition(next))
    }

    /// Record tokens obtained outside a password login (refresh exchange).
    ///
    /// Returns `None` when the state does not change, e.g. a refresh while syncing.
    pub fn mark_authenticated(&mut self) -> Option<BotEvent> {
        match self.state {
            ClientLifecycleState::Unauthenticated | ClientLifecycleState::Stopped => {
                Some(self.transition(ClientLifecycleState::Authenticated))
            }
            _ => None,
        }
    }

    pub fn start_sync(&mut self) -> Result<BotEvent, InvalidStateError> {
        use ClientLifecycleState::*;

        if !matches!(self.state, Authenticated | Stopped) {
            return Err(InvalidStateError::new(self.state, "run"));
        }
        self.cursor = None;
        Ok(self.transition(Syncing))
    }

    pub fn advance(&mut self, next_batch: impl Into<String>) -> Result<(), InvalidStateError> {
        if self.state != ClientLifecycleState::Syncing {
            return Err(InvalidStateError::new(self.state, "advance_cursor"));
        }
        self.cursor = Some(next_batch.into());
        Ok(())
    }

    pub fn stop(&mut self) -> Result<BotEvent, InvalidStateError> {
        if self.state != ClientLifecycleState::Syncing {
            return Err(InvalidStateError::new(self.state, "stop"));
        }
        Ok(self.transition(ClientLifecycleState::Stopped))
    }

    fn transition(&mut self, next: ClientLifecycleState) -> BotEvent {
        self.state = next;
        BotEvent::StateChanged { state: next }
    }
}
