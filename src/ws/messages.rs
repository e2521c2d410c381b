//! WebSocket frame codec for relay events.
//!
//! Every frame is a JSON text message of the shape
//! `{"event": "<name>", "data": {...}}`:
//!
//! | Direction        | `event`        | `data`                        |
//! |------------------|----------------|-------------------------------|
//! | Client → Server  | `chat-message` | `{handle, message}`           |
//! | Client → Server  | `typing`       | `{handle}`                    |
//! | Server → Client  | `chat-message` | `{handle, message, seq}`      |
//! | Server → Client  | `typing`       | `{handle}`                    |
//! | Server → Client  | `welcome`      | `{session_id, last_seq}`      |
//! | Server → Client  | `error`        | `{code, message}`             |

use crate::domain::{InboundEvent, OutboundEvent};
use crate::error::RelayError;

/// Parses a client text frame.
///
/// # Errors
///
/// Returns [`RelayError::InvalidEvent`] if the frame is not valid JSON or
/// names an unknown event.
pub fn decode_frame(text: &str) -> Result<InboundEvent, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::InvalidEvent(format!("malformed frame: {e}")))
}

/// Serializes an outbound event to a text frame.
///
/// # Errors
///
/// Returns [`RelayError::Internal`] if serialization fails.
pub fn encode_event(event: &OutboundEvent) -> Result<String, RelayError> {
    serde_json::to_string(event).map_err(|e| RelayError::Internal(format!("encode failed: {e}")))
}
