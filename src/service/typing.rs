//! Per-sender debounce for typing indicators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::Broadcaster;
use crate::domain::{SessionId, TypingEvent};

/// Debounce table size above which expired entries are swept.
const PRUNE_THRESHOLD: usize = 1024;

/// Collapses bursts of typing notifications from one sender into at most
/// one relayed event per debounce window.
#[derive(Debug)]
pub struct TypingCoordinator {
    broadcaster: Arc<Broadcaster>,
    debounce: Duration,
    last_relayed: Mutex<HashMap<String, Instant>>,
}

impl TypingCoordinator {
    /// Creates a coordinator relaying through `broadcaster`.
    #[must_use]
    pub fn new(broadcaster: Arc<Broadcaster>, debounce: Duration) -> Self {
        Self {
            broadcaster,
            debounce,
            last_relayed: Mutex::new(HashMap::new()),
        }
    }

    /// Configured debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Relays a typing event from `handle` to everyone but `source`, unless
    /// one was relayed for the same handle within the last window.
    ///
    /// Returns `true` if the event was relayed.
    pub async fn notify_typing(&self, handle: &str, source: &SessionId) -> bool {
        self.notify_typing_at(handle, source, Instant::now()).await
    }

    /// [`Self::notify_typing`] with an explicit clock reading.
    pub async fn notify_typing_at(&self, handle: &str, source: &SessionId, now: Instant) -> bool {
        if !self.admit(handle, now) {
            tracing::trace!(handle, session_id = %source, "typing event suppressed");
            return false;
        }
        let _ = self
            .broadcaster
            .relay_typing(TypingEvent::new(handle), Some(source))
            .await;
        true
    }

    /// Number of senders currently tracked.
    #[must_use]
    pub fn tracked_senders(&self) -> usize {
        self.last_relayed.lock().len()
    }

    fn admit(&self, handle: &str, now: Instant) -> bool {
        let mut table = self.last_relayed.lock();
        if let Some(last) = table.get(handle)
            && now.saturating_duration_since(*last) <= self.debounce
        {
            return false;
        }
        table.insert(handle.to_string(), now);
        if table.len() > PRUNE_THRESHOLD {
            let window = self.debounce;
            table.retain(|_, last| now.saturating_duration_since(*last) <= window);
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{OutboundEvent, QueuePolicy, Session, SessionRegistry};

    async fn setup(debounce_ms: u64) -> (TypingCoordinator, Arc<Session>, Arc<Session>) {
        let registry = Arc::new(SessionRegistry::new());
        let source = Arc::new(Session::new(QueuePolicy::default()));
        let peer = Arc::new(Session::new(QueuePolicy::default()));
        let _ = registry.register(Arc::clone(&source)).await;
        let _ = registry.register(Arc::clone(&peer)).await;
        let broadcaster = Arc::new(Broadcaster::new(registry, Duration::from_secs(5)));
        (
            TypingCoordinator::new(broadcaster, Duration::from_millis(debounce_ms)),
            source,
            peer,
        )
    }

    fn typing_count(session: &Session) -> usize {
        session
            .queued_events()
            .iter()
            .filter(|e| matches!(e, OutboundEvent::Typing(_)))
            .count()
    }

    #[tokio::test]
    async fn burst_within_window_collapses_to_one() {
        let (coordinator, source, peer) = setup(1000).await;
        let start = Instant::now();
        let mut relayed = 0;
        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 50);
            if coordinator.notify_typing_at("bob", source.id(), now).await {
                relayed += 1;
            }
        }
        assert_eq!(relayed, 1);
        assert_eq!(typing_count(&peer), 1);
        assert_eq!(typing_count(&source), 0);
    }

    #[tokio::test]
    async fn relays_again_after_window() {
        let (coordinator, source, peer) = setup(1000).await;
        let start = Instant::now();
        assert!(coordinator.notify_typing_at("bob", source.id(), start).await);
        assert!(
            !coordinator
                .notify_typing_at("bob", source.id(), start + Duration::from_millis(999))
                .await
        );
        // exactly one window later is still inside it
        assert!(
            !coordinator
                .notify_typing_at("bob", source.id(), start + Duration::from_millis(1000))
                .await
        );
        assert!(
            coordinator
                .notify_typing_at("bob", source.id(), start + Duration::from_millis(1001))
                .await
        );
        // the window restarts at the last relay, not the last suppressed event
        assert!(
            !coordinator
                .notify_typing_at("bob", source.id(), start + Duration::from_millis(1500))
                .await
        );
        assert_eq!(typing_count(&peer), 2);
    }

    #[tokio::test]
    async fn senders_are_debounced_independently() {
        let (coordinator, source, peer) = setup(1000).await;
        let now = Instant::now();
        assert!(coordinator.notify_typing_at("bob", source.id(), now).await);
        assert!(coordinator.notify_typing_at("eve", source.id(), now).await);
        assert_eq!(typing_count(&peer), 2);
        assert_eq!(coordinator.tracked_senders(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned() {
        let (coordinator, source, _peer) = setup(10).await;
        let start = Instant::now();
        for i in 0..PRUNE_THRESHOLD {
            let _ = coordinator.notify_typing_at(&format!("user{i}"), source.id(), start).await;
        }
        assert_eq!(coordinator.tracked_senders(), PRUNE_THRESHOLD);

        let later = start + Duration::from_millis(20);
        let _ = coordinator.notify_typing_at("late", source.id(), later).await;
        assert_eq!(coordinator.tracked_senders(), 1);
    }
}
