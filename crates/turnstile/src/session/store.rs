//! Session store with atomic put / take.
//!
//! A single mutex guards the map. It is only held for the map operation
//! itself, never across an `.await`, so platform I/O never waits on it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use turnstile_common::{MessageRef, TurnstileError};

use super::{SessionId, SessionKey, VerificationSession};
use crate::timer::TimerHandle;

/// Mapping from (conversation, member) to the pending session
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, VerificationSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, VerificationSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new pending session.
    ///
    /// Fails with `DuplicateSession` if the member already has one.
    pub fn put(&self, session: VerificationSession) -> Result<(), TurnstileError> {
        match self.lock().entry(session.key) {
            Entry::Occupied(existing) => Err(TurnstileError::DuplicateSession {
                conversation: existing.key().conversation.0,
                member: existing.key().member.0,
            }),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Atomically remove and return the session for `key` if it is session `id`.
    ///
    /// This is the race arbiter: the first caller gets the session, every
    /// later caller (or a caller holding a stale id) gets `None`.
    pub fn take(&self, key: &SessionKey, id: &SessionId) -> Option<VerificationSession> {
        let mut sessions = self.lock();
        if sessions.get(key).is_some_and(|session| &session.id == id) {
            sessions.remove(key)
        } else {
            None
        }
    }

    /// Record the delivered prompt and the armed timer on a pending session.
    ///
    /// If the session was resolved in the meantime the timer handle is given
    /// back so the caller can cancel it.
    pub fn attach(
        &self,
        key: &SessionKey,
        id: &SessionId,
        prompt: MessageRef,
        timer: Option<TimerHandle>,
    ) -> Result<(), Option<TimerHandle>> {
        match self.lock().get_mut(key) {
            Some(session) if &session.id == id && session.is_pending() => {
                session.prompt_ref = Some(prompt);
                session.timer = timer;
                Ok(())
            }
            _ => Err(timer),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_common::{ConversationId, MemberId};

    fn key(member: i64) -> SessionKey {
        SessionKey::new(ConversationId(-100), MemberId(member))
    }

    fn session(member: i64) -> VerificationSession {
        VerificationSession::new(key(member), "member", None)
    }

    #[test]
    fn test_put_rejects_duplicate() {
        let store = SessionStore::new();
        store.put(session(1)).unwrap();

        let err = store.put(session(1)).unwrap_err();
        assert!(matches!(err, TurnstileError::DuplicateSession { member: 1, .. }));
        assert_eq!(store.len(), 1);

        // Other members and other conversations are independent
        store.put(session(2)).unwrap();
        let elsewhere = VerificationSession::new(
            SessionKey::new(ConversationId(-200), MemberId(1)),
            "member",
            None,
        );
        store.put(elsewhere).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_take_is_once() {
        let store = SessionStore::new();
        let pending = session(1);
        let id = pending.id.clone();
        store.put(pending).unwrap();

        let taken = store.take(&key(1), &id).unwrap();
        assert_eq!(taken.id, id);
        assert!(store.take(&key(1), &id).is_none());
        assert!(store.take(&key(99), &id).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_take_ignores_stale_id() {
        let store = SessionStore::new();
        let current = session(1);
        let id = current.id.clone();
        store.put(current).unwrap();

        assert!(store.take(&key(1), &SessionId::from_raw("stale000")).is_none());
        assert!(store.contains(&key(1)));
        assert!(store.take(&key(1), &id).is_some());
    }

    #[test]
    fn test_attach_after_resolution_returns_timer() {
        let store = SessionStore::new();
        let pending = session(1);
        let id = pending.id.clone();
        store.put(pending).unwrap();

        let prompt = MessageRef::new(ConversationId(-100), 10);
        assert!(store.attach(&key(1), &id, prompt, None).is_ok());
        assert_eq!(store.take(&key(1), &id).unwrap().prompt_ref, Some(prompt));

        assert_eq!(store.attach(&key(1), &id, prompt, None), Err(None));
    }

    #[test]
    fn test_concurrent_take_has_single_winner() {
        for _ in 0..100 {
            let store = Arc::new(SessionStore::new());
            let pending = session(1);
            let id = pending.id.clone();
            store.put(pending).unwrap();

            let winners = Arc::new(AtomicUsize::new(0));
            std::thread::scope(|scope| {
                for _ in 0..8 {
                    let store = store.clone();
                    let winners = winners.clone();
                    let id = id.clone();
                    scope.spawn(move || {
                        if store.take(&key(1), &id).is_some() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });

            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
