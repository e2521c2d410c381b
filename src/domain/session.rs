//! Per-connection session: bounded outbound queue plus connection state.
//!
//! Every [`Session`] owns a drop-oldest queue of [`OutboundEvent`]s. The
//! broadcaster pushes into it, the session's outbound pump pops from it.
//! Queue contents and state live under one short-lived lock so a reader
//! never sees a state that disagrees with the queue.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::{OutboundEvent, SessionId};

/// Connection state of a session.
///
/// ```text
/// Connecting ──▶ Connected ◀──▶ Draining
///      │             │             │
///      └─────────────┴──────▶ Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Handshake in progress; not yet registered.
    Connecting,
    /// Registered and keeping up with its queue.
    Connected,
    /// Queue overflowed; oldest messages are being dropped.
    Draining,
    /// Disconnected. Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Draining)
                | (Self::Draining, Self::Connected)
                | (Self::Connecting | Self::Connected | Self::Draining, Self::Closed)
        )
    }

    /// Returns `true` for the states a registered session may be in.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Draining)
    }

    /// Returns the state name as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds applied to a session's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Maximum number of queued events.
    pub capacity: usize,
    /// Queue length at or below which a draining session recovers.
    pub low_water_mark: usize,
}

impl QueuePolicy {
    /// Builds a policy, clamping the low-water mark below `capacity`.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, low_water_mark: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            low_water_mark: low_water_mark.min(capacity.saturating_sub(1)),
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::new(256, 128)
    }
}

/// Result of pushing an event onto a session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Event appended; queue was under capacity.
    Queued,
    /// Queue was full: the oldest event was dropped to make room.
    DroppedOldest,
    /// Session is closed; the event was discarded.
    SessionClosed,
}

#[derive(Debug)]
struct SessionInner {
    queue: VecDeque<OutboundEvent>,
    state: SessionState,
    draining_since: Option<Instant>,
    last_typing_at: Option<DateTime<Utc>>,
    dropped: u64,
}

/// Server-side handle for one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    policy: QueuePolicy,
    connected_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    ready: Notify,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session with a freshly issued id, in state `Connecting`.
    #[must_use]
    pub fn new(policy: QueuePolicy) -> Self {
        Self::with_id(SessionId::new(), policy)
    }

    /// Creates a session with a caller-supplied id, in state `Connecting`.
    #[must_use]
    pub fn with_id(id: SessionId, policy: QueuePolicy) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            id,
            policy,
            connected_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                queue: VecDeque::with_capacity(policy.capacity.min(64)),
                state: SessionState::Connecting,
                draining_since: None,
                last_typing_at: None,
                dropped: 0,
            }),
            state_tx,
            ready: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Queue bounds for this session.
    #[must_use]
    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Returns a receiver that observes every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Token cancelled when the session closes.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of events waiting in the outbound queue.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Lifetime count of events dropped by the overflow policy.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// When the session entered `Draining`, if it is draining now.
    #[must_use]
    pub fn draining_since(&self) -> Option<Instant> {
        self.inner.lock().draining_since
    }

    /// Records that this session just sent a typing notification.
    pub fn record_typing(&self, at: DateTime<Utc>) {
        self.inner.lock().last_typing_at = Some(at);
    }

    /// Copies the queued events without removing them.
    #[must_use]
    pub fn queued_events(&self) -> Vec<OutboundEvent> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    /// Point-in-time copy of the session's observable attributes.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let inner = self.inner.lock();
        SessionInfo {
            session_id: self.id.clone(),
            state: inner.state,
            queued: inner.queue.len(),
            dropped: inner.dropped,
            connected_at: self.connected_at,
            last_typing_at: inner.last_typing_at,
        }
    }

    /// Moves `Connecting -> Connected`. Returns `false` otherwise.
    pub(crate) fn mark_connected(&self) -> bool {
        let mut inner = self.inner.lock();
        self.set_state(&mut inner, SessionState::Connected)
    }

    /// Pushes an event, applying the drop-oldest overflow policy.
    ///
    /// Overflow moves a `Connected` session to `Draining` and starts its
    /// drain clock; a session already draining keeps its original start.
    pub fn enqueue(&self, event: OutboundEvent) -> Enqueued {
        let mut inner = self.inner.lock();
        if !inner.state.is_live() {
            return Enqueued::SessionClosed;
        }

        let outcome = if inner.queue.len() >= self.policy.capacity {
            let _ = inner.queue.pop_front();
            inner.dropped = inner.dropped.saturating_add(1);
            if inner.state == SessionState::Connected {
                let _ = self.set_state(&mut inner, SessionState::Draining);
                inner.draining_since = Some(Instant::now());
            }
            Enqueued::DroppedOldest
        } else {
            Enqueued::Queued
        };

        inner.queue.push_back(event);
        drop(inner);
        self.ready.notify_one();
        outcome
    }

    /// Pops the next event without waiting.
    ///
    /// A draining session whose queue falls to the low-water mark returns
    /// to `Connected`.
    pub fn try_dequeue(&self) -> Option<OutboundEvent> {
        let mut inner = self.inner.lock();
        let event = inner.queue.pop_front()?;
        if inner.state == SessionState::Draining
            && inner.queue.len() <= self.policy.low_water_mark
            && self.set_state(&mut inner, SessionState::Connected)
        {
            inner.draining_since = None;
            tracing::debug!(session_id = %self.id, "session recovered from draining");
        }
        Some(event)
    }

    /// Waits for the next event. Returns `None` once the session closes.
    pub async fn next_outbound(&self) -> Option<OutboundEvent> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(event) = self.try_dequeue() {
                return Some(event);
            }
            tokio::select! {
                () = self.ready.notified() => {}
                () = self.cancel.cancelled() => return None,
            }
        }
    }

    /// Returns `true` if the session has been draining for at least `timeout`.
    #[must_use]
    pub fn drain_expired(&self, now: Instant, timeout: Duration) -> bool {
        let inner = self.inner.lock();
        inner.state == SessionState::Draining
            && inner
                .draining_since
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }

    /// Moves the session to `Closed`, discards its queue and cancels its
    /// in-flight write. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if !self.set_state(&mut inner, SessionState::Closed) {
            return false;
        }
        inner.queue.clear();
        inner.draining_since = None;
        drop(inner);
        self.cancel.cancel();
        true
    }

    fn set_state(&self, inner: &mut SessionInner, next: SessionState) -> bool {
        let prev = inner.state;
        if !prev.can_transition_to(next) {
            return false;
        }
        inner.state = next;
        let _ = self.state_tx.send_replace(next);
        tracing::trace!(session_id = %self.id, from = %prev, to = %next, "session state changed");
        true
    }
}

/// Serializable snapshot of a session for the REST API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    /// Session identifier.
    #[schema(value_type = String)]
    pub session_id: SessionId,
    /// Connection state.
    pub state: SessionState,
    /// Events waiting to be written.
    pub queued: usize,
    /// Events dropped by the overflow policy.
    pub dropped: u64,
    /// Connect timestamp.
    pub connected_at: DateTime<Utc>,
    /// Last typing notification received from this session.
    pub last_typing_at: Option<DateTime<Utc>>,
}
