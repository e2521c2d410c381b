//! Connection lifecycle: accept, inbound dispatch, disconnect, eviction.
//!
//! [`LifecycleManager`] is what a transport talks to. It owns the
//! `Connecting -> Connected` and `* -> Closed` transitions and routes
//! inbound events to the [`Broadcaster`] or the [`TypingCoordinator`].
//! `Connected <-> Draining` is driven by the session queue itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::delivery::{EventSink, PumpExit, PumpOutcome, run_outbound_pump};
use super::{BroadcastReport, Broadcaster, TypingCoordinator};
use crate::config::RelayConfig;
use crate::domain::{
    ChatMessage, InboundEvent, OutboundEvent, QueuePolicy, Session, SessionId, SessionRegistry,
};
use crate::error::RelayError;

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the connection.
    ClientClosed,
    /// Reading from or writing to the transport failed.
    TransportError,
    /// The session stayed in `Draining` too long.
    DrainTimeout,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::DrainTimeout => "drain_timeout",
            Self::Shutdown => "shutdown",
        })
    }
}

/// What an inbound event turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A chat message was broadcast.
    Broadcast(BroadcastReport),
    /// A typing event was relayed (`true`) or debounced (`false`).
    Typing {
        /// Whether the event reached other sessions.
        relayed: bool,
    },
}

/// Field limits applied to inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventLimits {
    max_handle_len: usize,
    max_message_len: usize,
}

/// Entry point for transports: one instance per relay.
#[derive(Debug)]
pub struct LifecycleManager {
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    typing: TypingCoordinator,
    policy: QueuePolicy,
    limits: EventLimits,
}

impl LifecycleManager {
    /// Builds the registry, broadcaster and typing coordinator from `config`.
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), config.drain_timeout));
        let typing = TypingCoordinator::new(Arc::clone(&broadcaster), config.typing_debounce);
        Self {
            registry,
            broadcaster,
            typing,
            policy: config.queue_policy(),
            limits: EventLimits {
                max_handle_len: config.max_handle_len,
                max_message_len: config.max_message_len,
            },
        }
    }

    /// Session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Typing coordinator.
    #[must_use]
    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    /// Queue bounds given to new sessions.
    #[must_use]
    pub const fn queue_policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Completes a handshake: creates and registers a new session, then
    /// queues its `welcome` event.
    ///
    /// # Errors
    ///
    /// Propagates registry errors (see [`SessionRegistry::register`]).
    pub async fn connect(&self) -> Result<Arc<Session>, RelayError> {
        self.admit(Session::new(self.policy)).await
    }

    /// Like [`Self::connect`] with a transport-provided session id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateId`] if `id` is already live.
    pub async fn connect_with_id(&self, id: SessionId) -> Result<Arc<Session>, RelayError> {
        self.admit(Session::with_id(id, self.policy)).await
    }

    async fn admit(&self, session: Session) -> Result<Arc<Session>, RelayError> {
        let session = Arc::new(session);
        let id = self.broadcaster.admit(&session).await?;
        let live = self.registry.len().await;
        tracing::info!(session_id = %id, live, "client connected");
        Ok(session)
    }

    /// Routes one inbound event from `source`.
    ///
    /// Chat messages go to every session including the sender; typing
    /// events go to everyone but the sender, subject to debounce.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionNotFound`] if `source` is not live, or
    /// [`RelayError::InvalidEvent`] if the event fails validation.
    pub async fn handle_event(&self, source: &SessionId, event: InboundEvent) -> Result<EventOutcome, RelayError> {
        let session = self.registry.get(source).await?;
        event.validate(self.limits.max_handle_len, self.limits.max_message_len)?;

        match event {
            InboundEvent::ChatMessage { handle, message } => {
                let report = self
                    .broadcaster
                    .broadcast(ChatMessage::new(handle, message), None)
                    .await;
                Ok(EventOutcome::Broadcast(report))
            }
            InboundEvent::Typing { handle } => {
                session.record_typing(Utc::now());
                let relayed = self.typing.notify_typing(&handle, source).await;
                Ok(EventOutcome::Typing { relayed })
            }
        }
    }

    /// Reports a bad frame back to the session that sent it.
    pub async fn report_error(&self, target: &SessionId, err: &RelayError) {
        if let Err(send_err) = self
            .broadcaster
            .send_to(target, OutboundEvent::from_error(err))
            .await
        {
            tracing::debug!(session_id = %target, error = %send_err, "could not report error to session");
        }
    }

    /// Closes and unregisters a session. Returns `false` if it was not live.
    pub async fn disconnect(&self, id: &SessionId, reason: DisconnectReason) -> bool {
        let Some(session) = self.registry.unregister(id).await else {
            return false;
        };
        let live = self.registry.len().await;
        tracing::info!(
            session_id = %id,
            %reason,
            dropped = session.dropped_count(),
            live,
            "client disconnected"
        );
        true
    }

    /// Evicts every session that has been draining past the timeout.
    pub async fn reap_stalled(&self, now: Instant) -> Vec<SessionId> {
        self.broadcaster.evict_stalled(now).await
    }

    /// Runs the outbound pump for `session` and closes the session if the
    /// transport fails.
    pub async fn deliver<S: EventSink>(&self, session: Arc<Session>, sink: S) -> PumpOutcome {
        let id = session.id().clone();
        let outcome = run_outbound_pump(session, sink).await;
        match &outcome.exit {
            PumpExit::Failed(err) => {
                tracing::warn!(session_id = %id, error = %err, "outbound write failed");
                let _ = self.disconnect(&id, DisconnectReason::TransportError).await;
            }
            PumpExit::Cancelled => {
                tracing::debug!(session_id = %id, "in-flight write cancelled");
            }
            PumpExit::Closed => {}
        }
        outcome
    }

    /// Spawns the periodic stalled-session reaper. It stops when `shutdown`
    /// is cancelled.
    pub fn spawn_drain_reaper(self: &Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    now = ticker.tick() => {
                        let evicted = manager.reap_stalled(now).await;
                        if !evicted.is_empty() {
                            tracing::info!(count = evicted.len(), reason = %DisconnectReason::DrainTimeout, "reaped stalled sessions");
                        }
                    }
                }
            }
            tracing::debug!("drain reaper stopped");
        })
    }

    /// Closes every live session. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.clear().await;
        tracing::info!(closed, reason = %DisconnectReason::Shutdown, "all sessions closed");
        closed
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::SessionState;
    use crate::service::delivery::tests::{BrokenSink, ChannelSink};

    fn manager(capacity: usize) -> LifecycleManager {
        LifecycleManager::new(&RelayConfig {
            queue_capacity: capacity,
            queue_low_water_mark: capacity / 2,
            drain_timeout: Duration::from_secs(5),
            typing_debounce: Duration::from_millis(1000),
            ..RelayConfig::default()
        })
    }

    async fn connect(manager: &LifecycleManager) -> Arc<Session> {
        let Ok(session) = manager.connect().await else {
            panic!("connect failed");
        };
        let Some(OutboundEvent::Welcome { .. }) = session.try_dequeue() else {
            panic!("expected welcome");
        };
        session
    }

    fn chat(handle: &str, message: &str) -> InboundEvent {
        InboundEvent::ChatMessage {
            handle: handle.to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn connect_registers_and_welcomes() {
        let manager = manager(8);
        let Ok(session) = manager.connect().await else {
            panic!("connect failed");
        };
        assert_eq!(session.state(), SessionState::Connected);
        assert!(manager.registry().contains(session.id()).await);
        let Some(OutboundEvent::Welcome { session_id, last_seq }) = session.try_dequeue() else {
            panic!("expected welcome");
        };
        assert_eq!(&session_id, session.id());
        assert_eq!(last_seq, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn welcome_is_first_while_chat_is_flowing() {
        let manager = Arc::new(manager(1_024));
        let speaker = connect(&manager).await;
        let chatter = {
            let manager = Arc::clone(&manager);
            let source = speaker.id().clone();
            tokio::spawn(async move {
                for n in 0..5_000 {
                    let _ = manager.handle_event(&source, chat("alice", &format!("{n}"))).await;
                    let _ = speaker.try_dequeue();
                }
            })
        };

        while !chatter.is_finished() {
            let Ok(session) = manager.connect().await else {
                panic!("connect failed");
            };
            let first = session.try_dequeue();
            assert!(
                matches!(first, Some(OutboundEvent::Welcome { .. })),
                "first event was {first:?}"
            );
            let _ = manager.disconnect(session.id(), DisconnectReason::ClientClosed).await;
        }
        let Ok(()) = chatter.await else {
            panic!("chat task failed");
        };
    }

    #[tokio::test]
    async fn duplicate_transport_id_is_rejected() {
        let manager = manager(8);
        let id = SessionId::from_external("sock-1");
        assert!(manager.connect_with_id(id.clone()).await.is_ok());
        let result = manager.connect_with_id(id).await;
        assert!(matches!(result, Err(RelayError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn chat_reaches_sender_too() {
        let manager = manager(8);
        let a = connect(&manager).await;
        let b = connect(&manager).await;

        let Ok(EventOutcome::Broadcast(report)) = manager.handle_event(a.id(), chat("alice", "hi")).await else {
            panic!("expected broadcast");
        };
        assert_eq!(report.seq, Some(1));
        assert_eq!(report.delivered, 2);
        assert_eq!(a.try_dequeue().and_then(|e| e.seq()), Some(1));
        assert_eq!(b.try_dequeue().and_then(|e| e.seq()), Some(1));
    }

    #[tokio::test]
    async fn typing_skips_sender_and_records_timestamp() {
        let manager = manager(8);
        let a = connect(&manager).await;
        let b = connect(&manager).await;
        let typing = InboundEvent::Typing {
            handle: "alice".to_string(),
        };

        let first = manager.handle_event(a.id(), typing.clone()).await;
        let second = manager.handle_event(a.id(), typing).await;
        assert!(matches!(first, Ok(EventOutcome::Typing { relayed: true })));
        assert!(matches!(second, Ok(EventOutcome::Typing { relayed: false })));
        assert_eq!(a.queued_len(), 0);
        assert_eq!(b.queued_len(), 1);
        assert!(a.info().last_typing_at.is_some());
    }

    #[tokio::test]
    async fn invalid_event_is_rejected_and_reported() {
        let manager = manager(8);
        let a = connect(&manager).await;
        let result = manager.handle_event(a.id(), chat("", "hi")).await;
        let Err(err) = result else {
            panic!("expected validation error");
        };
        assert!(matches!(err, RelayError::InvalidEvent(_)));

        manager.report_error(a.id(), &err).await;
        let Some(OutboundEvent::Error { code, .. }) = a.try_dequeue() else {
            panic!("expected error event");
        };
        assert_eq!(code, 1001);
        assert_eq!(manager.broadcaster().last_seq(), 0);
    }

    #[tokio::test]
    async fn events_from_unknown_sessions_are_rejected() {
        let manager = manager(8);
        let result = manager.handle_event(&SessionId::new(), chat("x", "y")).await;
        assert!(matches!(result, Err(RelayError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = manager(8);
        let a = connect(&manager).await;
        assert!(manager.disconnect(a.id(), DisconnectReason::ClientClosed).await);
        assert!(!manager.disconnect(a.id(), DisconnectReason::ClientClosed).await);
        assert_eq!(a.state(), SessionState::Closed);
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_session_drains_then_is_closed() {
        let manager = manager(2);
        let a = connect(&manager).await;
        let b = connect(&manager).await;
        let mut b_state = b.subscribe_state();

        for i in 0..2 {
            let _ = manager.handle_event(a.id(), chat("alice", &format!("{i}"))).await;
            let _ = a.try_dequeue();
        }
        let _ = manager.handle_event(a.id(), chat("alice", "overflow")).await;
        assert_eq!(b.state(), SessionState::Draining);
        assert_eq!(b.dropped_count(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let evicted = manager.reap_stalled(Instant::now()).await;
        assert_eq!(evicted, vec![b.id().clone()]);
        assert!(b_state.has_changed().unwrap_or(false));
        assert_eq!(*b_state.borrow_and_update(), SessionState::Closed);
        assert_eq!(a.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_evicts_in_background() {
        let manager = Arc::new(manager(1));
        let a = connect(&manager).await;
        let _ = manager.handle_event(a.id(), chat("a", "1")).await;
        let _ = manager.handle_event(a.id(), chat("a", "2")).await;
        assert_eq!(a.state(), SessionState::Draining);

        let shutdown = CancellationToken::new();
        let reaper = manager.spawn_drain_reaper(Duration::from_millis(100), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(5_200)).await;

        assert_eq!(a.state(), SessionState::Closed);
        shutdown.cancel();
        assert!(reaper.await.is_ok());
    }

    #[tokio::test]
    async fn transport_failure_disconnects_session() {
        let manager = manager(8);
        let a = connect(&manager).await;
        let _ = manager.handle_event(a.id(), chat("a", "hello")).await;

        let outcome = manager.deliver(Arc::clone(&a), BrokenSink).await;
        assert!(matches!(outcome.exit, PumpExit::Failed(_)));
        assert_eq!(a.state(), SessionState::Closed);
        assert!(!manager.registry().contains(a.id()).await);
    }

    #[tokio::test]
    async fn deliver_forwards_until_disconnect() {
        let manager = Arc::new(manager(8));
        let a = connect(&manager).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump_manager = Arc::clone(&manager);
        let pump_session = Arc::clone(&a);
        let pump = tokio::spawn(async move { pump_manager.deliver(pump_session, ChannelSink(tx)).await });

        let _ = manager.handle_event(a.id(), chat("a", "hello")).await;
        let Some(event) = rx.recv().await else {
            panic!("expected event");
        };
        assert_eq!(event.seq(), Some(1));

        let _ = manager.disconnect(a.id(), DisconnectReason::ClientClosed).await;
        let Ok(outcome) = pump.await else {
            panic!("pump panicked");
        };
        assert_eq!(outcome.written, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_everyone() {
        let manager = manager(8);
        let a = connect(&manager).await;
        let b = connect(&manager).await;
        assert_eq!(manager.shutdown().await, 2);
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }
}
