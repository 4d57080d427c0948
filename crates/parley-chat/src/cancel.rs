//! Per-session cancellation of in-flight turns.
//!
//! Each running turn registers a [`CancellationToken`] under its session id.
//! A stop request fires the token; the turn loop observes it before reading
//! the next fragment and finishes with a `stopped` outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use parley_core::types::SessionId;

struct ActiveTurn {
    turn_id: Uuid,
    token: CancellationToken,
}

/// Registry of cancellable turns, one per session at most.
#[derive(Clone, Default)]
pub struct TurnRegistry {
    active: Arc<Mutex<HashMap<SessionId, ActiveTurn>>>,
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn for `session_id`.
    ///
    /// The returned ticket deregisters on drop. A leftover entry for the same
    /// session is replaced.
    pub fn register(&self, session_id: SessionId) -> TurnTicket {
        let turn_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.lock().insert(
            session_id.clone(),
            ActiveTurn {
                turn_id,
                token: token.clone(),
            },
        );
        debug!(session_id = %session_id, turn_id = %turn_id, "Turn registered");
        TurnTicket {
            registry: self.clone(),
            session_id,
            turn_id,
            token,
        }
    }

    /// Request cancellation of the session's active turn.
    ///
    /// Returns `false` when nothing is running. Cancelling twice is harmless.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match self.lock().get(session_id) {
            Some(active) => {
                active.token.cancel();
                debug!(session_id = %session_id, turn_id = %active.turn_id, "Turn cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn deregister(&self, session_id: &SessionId, turn_id: Uuid) {
        let mut active = self.lock();
        if active.get(session_id).is_some_and(|a| a.turn_id == turn_id) {
            active.remove(session_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, ActiveTurn>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TurnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Registration of one running turn.
#[derive(Debug)]
pub struct TurnTicket {
    registry: TurnRegistry,
    session_id: SessionId,
    turn_id: Uuid,
    token: CancellationToken,
}

impl TurnTicket {
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        self.registry.deregister(&self.session_id, self.turn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_fires_registered_token() {
        let registry = TurnRegistry::new();
        let id = SessionId::generate();
        let ticket = registry.register(id.clone());
        assert!(registry.is_active(&id));
        assert!(!ticket.is_cancelled());

        assert!(registry.cancel(&id));
        assert!(ticket.is_cancelled());
        assert!(ticket.token().is_cancelled());
        // Idempotent.
        assert!(registry.cancel(&id));
    }

    #[test]
    fn test_cancel_without_turn_is_noop() {
        let registry = TurnRegistry::new();
        assert!(!registry.cancel(&SessionId::generate()));
    }

    #[test]
    fn test_ticket_drop_deregisters() {
        let registry = TurnRegistry::new();
        let id = SessionId::generate();
        let ticket = registry.register(id.clone());
        assert_eq!(registry.active_count(), 1);
        drop(ticket);
        assert!(!registry.is_active(&id));
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_stale_ticket_does_not_remove_newer_turn() {
        let registry = TurnRegistry::new();
        let id = SessionId::generate();
        let old = registry.register(id.clone());
        let new = registry.register(id.clone());
        assert_ne!(old.turn_id(), new.turn_id());

        drop(old);
        assert!(registry.is_active(&id));
        registry.cancel(&id);
        assert!(new.is_cancelled());
    }

    #[test]
    fn test_cancel_is_scoped_to_session() {
        let registry = TurnRegistry::new();
        let a = registry.register(SessionId::generate());
        let b = registry.register(SessionId::generate());
        registry.cancel(a.session_id());
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
