//! Live-session store shared by the broadcaster and the lifecycle manager.
//!
//! [`SessionRegistry`] keeps every registered [`Session`] in a `HashMap`
//! behind a [`tokio::sync::RwLock`]. Registration order is recorded so
//! that [`SessionRegistry::snapshot`] always yields sessions in the same
//! order, keeping fan-out deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Session, SessionId};
use crate::error::RelayError;

#[derive(Debug)]
struct Registered {
    order: u64,
    session: Arc<Session>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Registered>,
    next_order: u64,
}

/// Central store for all live sessions.
///
/// # Concurrency
///
/// - Register, unregister and the accompanying state transition happen
///   under the write lock, so snapshot readers never see a closed session
///   or a half-registered one.
/// - Snapshots copy the membership out and release the lock immediately.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `Connecting` session and moves it to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateId`] if a session with the same id is
    /// already registered (only possible with externally supplied ids), or
    /// [`RelayError::Internal`] if the session is not in `Connecting`.
    pub async fn register(&self, session: Arc<Session>) -> Result<SessionId, RelayError> {
        let id = session.id().clone();
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&id) {
            return Err(RelayError::DuplicateId(id));
        }
        if !session.mark_connected() {
            return Err(RelayError::Internal(format!(
                "session {id} cannot be registered from state {}",
                session.state()
            )));
        }
        let order = inner.next_order;
        inner.next_order = inner.next_order.saturating_add(1);
        inner.sessions.insert(id.clone(), Registered { order, session });
        tracing::debug!(session_id = %id, live = inner.sessions.len(), "session registered");
        Ok(id)
    }

    /// Closes and removes a session, returning it if it was present.
    ///
    /// Idempotent: unregistering an absent id is a no-op.
    pub async fn unregister(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.remove(id)?;
        let _ = removed.session.close();
        tracing::debug!(session_id = %id, live = inner.sessions.len(), "session unregistered");
        Some(removed.session)
    }

    /// Closes and removes a session only if `predicate` holds for it while
    /// the write lock is held.
    pub async fn unregister_if<F>(&self, id: &SessionId, predicate: F) -> Option<Arc<Session>>
    where
        F: FnOnce(&Session) -> bool,
    {
        let mut inner = self.inner.write().await;
        if !inner.sessions.get(id).is_some_and(|entry| predicate(&entry.session)) {
            return None;
        }
        let removed = inner.sessions.remove(id)?;
        let _ = removed.session.close();
        tracing::debug!(session_id = %id, live = inner.sessions.len(), "session unregistered");
        Some(removed.session)
    }

    /// Returns the live sessions in registration order.
    ///
    /// The returned vector is a copy: registrations and removals made after
    /// the call do not affect it.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Registered> = inner.sessions.values().collect();
        entries.sort_unstable_by_key(|entry| entry.order);
        entries
            .into_iter()
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    /// Looks up a live session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if no such session is
    /// registered.
    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>, RelayError> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))
    }

    /// Returns `true` if the id is currently registered.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().await.sessions.contains_key(id)
    }

    /// Closes and removes every session, returning how many were removed.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.sessions.len();
        for (_, entry) in inner.sessions.drain() {
            let _ = entry.session.close();
        }
        count
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Returns `true` if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::domain::{QueuePolicy, SessionState};

    fn session(id: &str) -> Arc<Session> {
        Arc::new(Session::with_id(SessionId::from(id), QueuePolicy::default()))
    }

    #[tokio::test]
    async fn register_marks_connected() {
        let registry = SessionRegistry::new();
        let s = session("a");
        let Ok(id) = registry.register(Arc::clone(&s)).await else {
            panic!("register failed");
        };
        assert_eq!(id, SessionId::from("a"));
        assert_eq!(s.state(), SessionState::Connected);
        assert!(registry.contains(&id).await);
    }

    #[tokio::test]
    async fn duplicate_external_id_is_rejected() {
        let registry = SessionRegistry::new();
        let _ = registry.register(session("a")).await;
        let result = registry.register(session("a")).await;
        assert!(matches!(result, Err(RelayError::DuplicateId(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_session_cannot_register() {
        let registry = SessionRegistry::new();
        let s = session("a");
        let _ = s.close();
        assert!(registry.register(s).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unregister_closes_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let s = session("a");
        let _ = registry.register(Arc::clone(&s)).await;
        let _ = registry.register(session("b")).await;

        let id = SessionId::from("a");
        assert!(registry.unregister(&id).await.is_some());
        assert_eq!(s.state(), SessionState::Closed);
        let after_once: Vec<_> = registry.snapshot().await.iter().map(|s| s.id().clone()).collect();

        assert!(registry.unregister(&id).await.is_none());
        let after_twice: Vec<_> = registry.snapshot().await.iter().map(|s| s.id().clone()).collect();
        assert_eq!(after_once, after_twice);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_if_checks_under_the_lock() {
        let registry = SessionRegistry::new();
        let s = session("a");
        let _ = registry.register(Arc::clone(&s)).await;
        let id = SessionId::from("a");

        assert!(registry.unregister_if(&id, |_| false).await.is_none());
        assert_eq!(s.state(), SessionState::Connected);
        assert!(registry.contains(&id).await);

        assert!(registry.unregister_if(&id, |s| s.state() == SessionState::Connected).await.is_some());
        assert_eq!(s.state(), SessionState::Closed);
        assert!(registry.unregister_if(&id, |_| true).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_under_churn_hold_no_retired_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let retired: Arc<parking_lot::Mutex<HashSet<SessionId>>> = Arc::default();
        let mut churners = Vec::new();
        for worker in 0..3 {
            let registry = Arc::clone(&registry);
            let retired = Arc::clone(&retired);
            churners.push(tokio::spawn(async move {
                for n in 0..500 {
                    let Ok(id) = registry.register(session(&format!("w{worker}-{n}"))).await else {
                        panic!("register failed");
                    };
                    tokio::task::yield_now().await;
                    let _ = registry.unregister(&id).await;
                    retired.lock().insert(id);
                }
            }));
        }

        while churners.iter().any(|handle| !handle.is_finished()) {
            // anything retired before the snapshot started must be absent from it
            let retired_before = retired.lock().clone();
            for s in registry.snapshot().await {
                assert_ne!(s.state(), SessionState::Connecting);
                assert!(!retired_before.contains(s.id()), "retired session {} in snapshot", s.id());
            }
            tokio::task::yield_now().await;
        }
        for handle in churners {
            let Ok(()) = handle.await else {
                panic!("churn task failed");
            };
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_follows_registration_order() {
        let registry = SessionRegistry::new();
        for id in ["c", "a", "d", "b"] {
            let _ = registry.register(session(id)).await;
        }
        let _ = registry.unregister(&SessionId::from("d")).await;
        let _ = registry.register(session("e")).await;

        let ids: Vec<_> = registry
            .snapshot()
            .await
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b", "e"]);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let registry = SessionRegistry::new();
        let _ = registry.register(session("a")).await;
        let snap = registry.snapshot().await;

        let _ = registry.register(session("b")).await;
        let _ = registry.unregister(&SessionId::from("a")).await;

        assert_eq!(snap.len(), 1);
        assert_eq!(snap.first().map(|s| s.id().to_string()), Some("a".to_string()));
    }

    #[tokio::test]
    async fn get_missing_returns_error() {
        let registry = SessionRegistry::new();
        let result = registry.get(&SessionId::new()).await;
        assert!(matches!(result, Err(RelayError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn clear_closes_everything() {
        let registry = SessionRegistry::new();
        let a = session("a");
        let _ = registry.register(Arc::clone(&a)).await;
        let _ = registry.register(session("b")).await;

        assert_eq!(registry.clear().await, 2);
        assert!(registry.is_empty().await);
        assert_eq!(a.state(), SessionState::Closed);
    }
}
