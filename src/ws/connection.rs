//! WebSocket connection loop.
//!
//! Each upgraded socket is split in two: the write half becomes the
//! session's [`EventSink`] and is driven by its own outbound pump task,
//! while this task reads client frames and hands them to the
//! [`LifecycleManager`].

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use super::messages::{decode_frame, encode_event};
use crate::domain::{OutboundEvent, SessionId};
use crate::error::RelayError;
use crate::service::{DisconnectReason, EventSink, LifecycleManager};

/// Write half of a WebSocket, used as a session's transport.
pub struct WsSink(SplitSink<WebSocket, Message>);

impl fmt::Debug for WsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSink").finish_non_exhaustive()
    }
}

impl EventSink for WsSink {
    async fn send(&mut self, event: &OutboundEvent) -> Result<(), RelayError> {
        let json = encode_event(event)?;
        self.0
            .send(Message::text(json))
            .await
            .map_err(|e| RelayError::TransportWrite(e.to_string()))
    }
}

/// Runs a single WebSocket connection from handshake to close.
pub async fn run_connection(socket: WebSocket, lifecycle: Arc<LifecycleManager>) {
    let session = match lifecycle.connect().await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting ws connection");
            return;
        }
    };
    let id = session.id().clone();
    let cancel = session.cancellation();
    let (ws_tx, mut ws_rx) = socket.split();

    let pump_lifecycle = Arc::clone(&lifecycle);
    let pump = tokio::spawn(async move { pump_lifecycle.deliver(session, WsSink(ws_tx)).await });

    let reason = loop {
        tokio::select! {
            // Closed server-side (eviction, transport failure, shutdown)
            () = cancel.cancelled() => break None,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&lifecycle, &id, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break Some(DisconnectReason::ClientClosed),
                    Some(Err(err)) => {
                        tracing::debug!(session_id = %id, error = %err, "ws read failed");
                        break Some(DisconnectReason::TransportError);
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    if let Some(reason) = reason {
        let _ = lifecycle.disconnect(&id, reason).await;
    }

    match pump.await {
        Ok(outcome) => tracing::debug!(session_id = %id, written = outcome.written, "ws connection closed"),
        Err(err) => tracing::warn!(session_id = %id, error = %err, "outbound pump task failed"),
    }
}

/// Decodes and dispatches one text frame, reporting failures back to the
/// sender only.
async fn handle_text(lifecycle: &LifecycleManager, id: &SessionId, text: &str) {
    let result = match decode_frame(text) {
        Ok(event) => lifecycle.handle_event(id, event).await.map(|_| ()),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::debug!(session_id = %id, error = %err, "rejected client frame");
        lifecycle.report_error(id, &err).await;
    }
}
