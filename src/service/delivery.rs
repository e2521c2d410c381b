//! Outbound pump: moves events from a session queue onto its transport.
//!
//! The transport is abstracted as an [`EventSink`]. Each session gets its
//! own pump task, so a slow or stuck sink only ever stalls its own queue.

use std::future::Future;
use std::sync::Arc;

use crate::domain::{OutboundEvent, Session};
use crate::error::RelayError;

/// Write side of a transport connection for one session.
pub trait EventSink: Send {
    /// Writes one event to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransportWrite`] if the write fails.
    fn send(&mut self, event: &OutboundEvent) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// Why an outbound pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The session closed while the pump was idle.
    Closed,
    /// The session closed while a write was in flight; the write was dropped.
    Cancelled,
    /// The transport rejected a write.
    Failed(RelayError),
}

/// Result of a finished pump.
#[derive(Debug)]
pub struct PumpOutcome {
    /// Why the pump stopped.
    pub exit: PumpExit,
    /// Events successfully written.
    pub written: u64,
}

/// Drains `session` into `sink` until the session closes or a write fails.
///
/// Closing the session cancels an in-flight write without touching any
/// other session's pump.
pub async fn run_outbound_pump<S: EventSink>(session: Arc<Session>, mut sink: S) -> PumpOutcome {
    let cancel = session.cancellation();
    let mut written = 0u64;
    loop {
        let Some(event) = session.next_outbound().await else {
            return PumpOutcome {
                exit: PumpExit::Closed,
                written,
            };
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return PumpOutcome { exit: PumpExit::Cancelled, written };
            }
            result = sink.send(&event) => match result {
                Ok(()) => written = written.saturating_add(1),
                Err(err) => return PumpOutcome { exit: PumpExit::Failed(err), written },
            },
        }
    }
}
