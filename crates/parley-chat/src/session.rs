//! Concurrency-safe session registry.
//!
//! The map lock is only held long enough to find or insert a slot. Each
//! session then has its own mutex for history, and a separate async gate
//! that admits one in-flight turn at a time. Different sessions never
//! contend beyond the brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use parley_core::types::{SessionId, SessionInfo, SessionStats, Timestamp, Turn};

use crate::error::ChatError;

/// Server-held conversation state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Append-only, oldest first.
    pub history: Vec<Turn>,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    /// The `limit` most recent turns, oldest first.
    pub fn context(&self, limit: usize) -> Vec<Turn> {
        let start = self.history.len().saturating_sub(limit);
        self.history[start..].to_vec()
    }

    fn is_expired(&self, ttl: Duration, now: Timestamp) -> bool {
        let idle = now.signed_duration_since(self.last_activity_at);
        match idle.to_std() {
            Ok(idle) => idle > ttl,
            // Clock went backwards: treat as freshly active.
            Err(_) => false,
        }
    }
}

struct SessionSlot {
    session: Mutex<Session>,
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

impl SessionSlot {
    fn new(id: SessionId) -> Self {
        Self {
            session: Mutex::new(Session::new(id)),
            turn_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn turn_in_progress(&self) -> bool {
        self.turn_gate.try_lock().is_err()
    }
}

/// Exclusive right to run one turn on a session.
///
/// Released on drop. A second `begin_turn` on the same session fails with
/// [`ChatError::TurnInProgress`] while a permit is alive.
#[derive(Debug)]
pub struct TurnPermit {
    session_id: SessionId,
    _guard: OwnedMutexGuard<()>,
}

impl TurnPermit {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Registry of live sessions keyed by id.
pub struct SessionStore {
    slots: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty store whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Allocate a new session with a fresh id.
    pub fn create(&self) -> SessionId {
        let mut slots = self.write_slots();
        let mut id = SessionId::generate();
        while slots.contains_key(&id) {
            id = SessionId::generate();
        }
        slots.insert(id.clone(), Arc::new(SessionSlot::new(id.clone())));
        info!(session_id = %id, "Session created");
        id
    }

    /// Return the live session for a client-supplied id, creating it if unseen.
    ///
    /// Returns `true` in the second field when the session was created.
    pub fn get_or_create(&self, id: &SessionId) -> (SessionId, bool) {
        if self.live_slot(id).is_ok() {
            return (id.clone(), false);
        }
        let mut slots = self.write_slots();
        if let Some(slot) = slots.get(id) {
            if slot.turn_in_progress() || !slot.lock().is_expired(self.ttl, Utc::now()) {
                return (id.clone(), false);
            }
        }
        slots.insert(id.clone(), Arc::new(SessionSlot::new(id.clone())));
        info!(session_id = %id, "Session created implicitly");
        (id.clone(), true)
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &SessionId) -> Result<Session, ChatError> {
        let slot = self.live_slot(id)?;
        let session = slot.lock().clone();
        Ok(session)
    }

    /// Ordered history of a session.
    pub fn history(&self, id: &SessionId) -> Result<Vec<Turn>, ChatError> {
        let slot = self.live_slot(id)?;
        let history = slot.lock().history.clone();
        Ok(history)
    }

    /// The `limit` most recent turns of a session.
    pub fn context(&self, id: &SessionId, limit: usize) -> Result<Vec<Turn>, ChatError> {
        let slot = self.live_slot(id)?;
        let context = slot.lock().context(limit);
        Ok(context)
    }

    /// Counts and timestamps for a session.
    pub fn info(&self, id: &SessionId) -> Result<SessionInfo, ChatError> {
        let slot = self.live_slot(id)?;
        let turn_in_progress = slot.turn_in_progress();
        let session = slot.lock();
        Ok(SessionInfo {
            session_id: session.id.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity_at,
            message_count: session.message_count(),
            turn_in_progress,
        })
    }

    /// Append one turn. Returns the new message count.
    pub fn append_turn(&self, id: &SessionId, turn: Turn) -> Result<usize, ChatError> {
        self.append_all(id, [turn])
    }

    /// Append a user turn and its answer atomically. Returns the new message count.
    pub fn append_exchange(
        &self,
        id: &SessionId,
        user: Turn,
        assistant: Turn,
    ) -> Result<usize, ChatError> {
        self.append_all(id, [user, assistant])
    }

    /// Claim the single turn slot of a session and mark it active.
    pub fn begin_turn(&self, id: &SessionId) -> Result<TurnPermit, ChatError> {
        let slot = self.live_slot(id)?;
        let guard = Arc::clone(&slot.turn_gate)
            .try_lock_owned()
            .map_err(|_| ChatError::TurnInProgress(id.clone()))?;
        slot.lock().last_activity_at = Utc::now();
        Ok(TurnPermit {
            session_id: id.clone(),
            _guard: guard,
        })
    }

    /// Remove a session. Idempotent; returns whether it existed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.write_slots().remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session deleted");
        }
        removed
    }

    /// Remove sessions idle for longer than `ttl`. Sessions with a turn in
    /// flight are kept. Returns the number removed.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut slots = self.write_slots();
        let before = slots.len();
        slots.retain(|_, slot| slot.turn_in_progress() || !slot.lock().is_expired(ttl, now));
        let removed = before - slots.len();
        if removed > 0 {
            info!(removed, remaining = slots.len(), "Swept expired sessions");
        }
        removed
    }

    /// Aggregate snapshot over live sessions.
    pub fn stats(&self) -> SessionStats {
        let now = Utc::now();
        let slots = self.read_slots();
        let mut stats = SessionStats::default();
        for slot in slots.values() {
            let session = slot.lock();
            if session.is_expired(self.ttl, now) {
                continue;
            }
            stats.active_sessions += 1;
            stats.total_messages += session.message_count();
            stats.oldest_session = Some(match stats.oldest_session {
                Some(oldest) if oldest <= session.created_at => oldest,
                _ => session.created_at,
            });
        }
        stats
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Private helpers --

    fn append_all<const N: usize>(
        &self,
        id: &SessionId,
        turns: [Turn; N],
    ) -> Result<usize, ChatError> {
        // Appends bypass the idle check: a turn that started on a live
        // session commits even if it streamed past the TTL.
        let slot = self
            .read_slots()
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::SessionNotFound(id.clone()))?;
        let mut session = slot.lock();
        session.history.extend(turns);
        session.last_activity_at = Utc::now();
        let count = session.message_count();
        debug!(session_id = %id, message_count = count, "History appended");
        Ok(count)
    }

    /// Find a slot, evicting it if it has expired.
    fn live_slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, ChatError> {
        let slot = self
            .read_slots()
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::SessionNotFound(id.clone()))?;

        let expired =
            !slot.turn_in_progress() && slot.lock().is_expired(self.ttl, Utc::now());
        if expired {
            let mut slots = self.write_slots();
            if slots.get(id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.remove(id);
                debug!(session_id = %id, "Expired session evicted on access");
            }
            return Err(ChatError::SessionNotFound(id.clone()));
        }
        Ok(slot)
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{Language, Role, TurnStatus};
    use uuid::Uuid;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn exchange(n: usize) -> (Turn, Turn) {
        (
            Turn::user(format!("question {}", n), Language::English),
            Turn::assistant(
                Uuid::new_v4(),
                format!("answer {}", n),
                Language::English,
                TurnStatus::Complete,
            ),
        )
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        let session = store.get(&id).unwrap();
        assert_eq!(session.id, id);
        assert!(session.history.is_empty());
        assert_eq!(session.created_at, session.last_activity_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_ids_are_unique() {
        let store = SessionStore::new(DAY);
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = SessionStore::new(DAY);
        let err = store.get(&SessionId::generate()).unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound(_)));
    }

    #[test]
    fn test_append_exchange_preserves_order() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        for n in 0..3 {
            let (user, bot) = exchange(n);
            let count = store.append_exchange(&id, user, bot).unwrap();
            assert_eq!(count, (n + 1) * 2);
        }
        let history = store.history(&id).unwrap();
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["question 0", "answer 0", "question 1", "answer 1", "question 2", "answer 2"]
        );
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[test]
    fn test_append_to_missing_session_fails() {
        let store = SessionStore::new(DAY);
        let id = SessionId::generate();
        let (user, _) = exchange(0);
        assert!(matches!(
            store.append_turn(&id, user),
            Err(ChatError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_append_updates_last_activity() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        let before = store.get(&id).unwrap().last_activity_at;
        std::thread::sleep(Duration::from_millis(5));
        let (user, _) = exchange(0);
        store.append_turn(&id, user).unwrap();
        assert!(store.get(&id).unwrap().last_activity_at > before);
    }

    #[test]
    fn test_context_returns_most_recent_turns() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        for n in 0..5 {
            let (user, bot) = exchange(n);
            store.append_exchange(&id, user, bot).unwrap();
        }
        let context = store.context(&id, 3).unwrap();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].content, "answer 3");
        assert_eq!(context[2].content, "answer 4");
        assert_eq!(store.context(&id, 100).unwrap().len(), 10);
        assert!(store.context(&id, 0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(matches!(store.history(&id), Err(ChatError::SessionNotFound(_))));
    }

    #[test]
    fn test_get_or_create_with_client_id() {
        let store = SessionStore::new(DAY);
        let id = SessionId::parse("browser-tab-1").unwrap();
        let (sid, created) = store.get_or_create(&id);
        assert_eq!(sid, id);
        assert!(created);
        let (_, created_again) = store.get_or_create(&id);
        assert!(!created_again);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_session_is_absent_after_sweep() {
        let store = SessionStore::new(DAY);
        let stale = store.create();
        let fresh = store.create();
        std::thread::sleep(Duration::from_millis(20));
        let (user, _) = exchange(0);
        store.append_turn(&fresh, user).unwrap();

        let removed = store.sweep_expired(Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert!(store.get(&stale).is_err());
        assert!(store.get(&fresh).is_ok());
    }

    #[test]
    fn test_get_evicts_expired_session() {
        let store = SessionStore::new(Duration::from_millis(10));
        let id = store.create();
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(store.get(&id), Err(ChatError::SessionNotFound(_))));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_begin_turn_rejects_second_turn() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        let permit = store.begin_turn(&id).unwrap();
        assert_eq!(permit.session_id(), &id);
        assert!(store.info(&id).unwrap().turn_in_progress);
        assert!(matches!(
            store.begin_turn(&id),
            Err(ChatError::TurnInProgress(_))
        ));
        drop(permit);
        assert!(!store.info(&id).unwrap().turn_in_progress);
        assert!(store.begin_turn(&id).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_keeps_session_with_turn_in_flight() {
        let store = SessionStore::new(DAY);
        let id = store.create();
        let _permit = store.begin_turn(&id).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.sweep_expired(Duration::from_millis(1)), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_other_sessions_unaffected_by_turn_gate() {
        let store = SessionStore::new(DAY);
        let a = store.create();
        let b = store.create();
        let _permit = store.begin_turn(&a).unwrap();
        assert!(store.begin_turn(&b).is_ok());
    }

    #[test]
    fn test_stats() {
        let store = SessionStore::new(DAY);
        assert_eq!(store.stats(), SessionStats::default());

        let first = store.create();
        let second = store.create();
        let (user, bot) = exchange(0);
        store.append_exchange(&second, user, bot).unwrap();

        let stats = store.stats();
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(
            stats.oldest_session,
            Some(store.get(&first).unwrap().created_at)
        );
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave_within_exchange() {
        let store = Arc::new(SessionStore::new(DAY));
        let id = store.create();
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let (user, bot) = exchange(n);
                        store.append_exchange(&id, user, bot).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = store.history(&id).unwrap();
        assert_eq!(history.len(), 8 * 25 * 2);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            let n = pair[0].content.trim_start_matches("question ");
            assert_eq!(pair[1].content, format!("answer {}", n));
        }
    }
}
