//! Fan-out of relay events onto per-session queues.
//!
//! [`Broadcaster`] takes a registry snapshot and enqueues onto every
//! session in it. Enqueueing never waits on a transport: slow sessions
//! absorb overflow through their drop-oldest queue and are evicted by
//! [`Broadcaster::evict_stalled`] if they stay behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{
    ChatMessage, Enqueued, OutboundEvent, Session, SessionId, SessionRegistry, TypingEvent,
};
use crate::error::RelayError;

/// Per-call fan-out statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sequence number assigned to the message (`None` for typing events).
    pub seq: Option<u64>,
    /// Sessions the event was enqueued onto.
    pub delivered: usize,
    /// Of `delivered`, sessions that had to drop their oldest event.
    pub overflowed: usize,
    /// Sessions excluded or closed before the enqueue.
    pub skipped: usize,
}

/// Fans events out to every live session.
///
/// A single fan-out lock covers "assign sequence number + enqueue to the
/// snapshot", so every queue receives broadcasts in invocation order.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    fanout: Mutex<()>,
    last_seq: AtomicU64,
    drain_timeout: Duration,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry` with the given drain timeout.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, drain_timeout: Duration) -> Self {
        Self {
            registry,
            fanout: Mutex::new(()),
            last_seq: AtomicU64::new(0),
            drain_timeout,
        }
    }

    /// Returns the registry this broadcaster reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Most recently assigned sequence number (`0` before the first message).
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Configured drain timeout.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Sequences `message` and enqueues it onto every live session except
    /// `exclude`.
    pub async fn broadcast(&self, message: ChatMessage, exclude: Option<&SessionId>) -> BroadcastReport {
        let _guard = self.fanout.lock().await;
        let seq = self.last_seq.load(Ordering::Acquire).saturating_add(1);
        self.last_seq.store(seq, Ordering::Release);

        let message = Arc::new(message.sequenced(seq));
        let mut report = self.fan_out(&OutboundEvent::ChatMessage(message), exclude).await;
        report.seq = Some(seq);

        tracing::debug!(
            seq,
            delivered = report.delivered,
            overflowed = report.overflowed,
            skipped = report.skipped,
            "chat message broadcast"
        );
        report
    }

    /// Enqueues a typing event onto every live session except `exclude`.
    pub async fn relay_typing(&self, event: TypingEvent, exclude: Option<&SessionId>) -> BroadcastReport {
        let _guard = self.fanout.lock().await;
        let report = self
            .fan_out(&OutboundEvent::Typing(Arc::new(event)), exclude)
            .await;
        tracing::trace!(delivered = report.delivered, "typing event relayed");
        report
    }

    /// Registers `session` and queues its `welcome` event under the fan-out
    /// lock, so the welcome precedes every broadcast the session receives.
    ///
    /// # Errors
    ///
    /// Propagates registry errors (see [`SessionRegistry::register`]).
    pub async fn admit(&self, session: &Arc<Session>) -> Result<SessionId, RelayError> {
        let _guard = self.fanout.lock().await;
        let id = self.registry.register(Arc::clone(session)).await?;
        let _ = session.enqueue(OutboundEvent::Welcome {
            session_id: id.clone(),
            last_seq: self.last_seq(),
        });
        Ok(id)
    }

    /// Enqueues an event onto a single session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if the session is not live.
    pub async fn send_to(&self, id: &SessionId, event: OutboundEvent) -> Result<Enqueued, RelayError> {
        let session = self.registry.get(id).await?;
        match session.enqueue(event) {
            Enqueued::SessionClosed => Err(RelayError::SessionNotFound(id.clone())),
            outcome => Ok(outcome),
        }
    }

    /// Unregisters every session that has been draining for at least the
    /// drain timeout as of `now`, returning the evicted ids.
    pub async fn evict_stalled(&self, now: Instant) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        for session in self.registry.snapshot().await {
            if !session.drain_expired(now, self.drain_timeout) {
                continue;
            }
            let id = session.id().clone();
            // the pump may have drained it since the snapshot
            let still_stalled = |s: &Session| s.drain_expired(now, self.drain_timeout);
            if self.registry.unregister_if(&id, still_stalled).await.is_some() {
                let err = RelayError::DrainTimeout {
                    session_id: id.clone(),
                    timeout_ms: u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
                };
                tracing::warn!(session_id = %id, dropped = session.dropped_count(), error = %err, "evicting stalled session");
                evicted.push(id);
            }
        }
        evicted
    }

    async fn fan_out(&self, event: &OutboundEvent, exclude: Option<&SessionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for session in self.registry.snapshot().await {
            if exclude.is_some_and(|id| id == session.id()) {
                report.skipped += 1;
                continue;
            }
            match session.enqueue(event.clone()) {
                Enqueued::Queued => report.delivered += 1,
                Enqueued::DroppedOldest => {
                    report.delivered += 1;
                    report.overflowed += 1;
                    let err = RelayError::QueueOverflow {
                        session_id: session.id().clone(),
                        dropped: session.dropped_count(),
                    };
                    tracing::debug!(session_id = %session.id(), error = %err, "dropped oldest queued event");
                }
                Enqueued::SessionClosed => report.skipped += 1,
            }
        }
        report
    }
}
