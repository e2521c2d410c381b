//! WebSocket transport: upgrade handler, connection loop, frame codec.
//!
//! The WebSocket endpoint at `/ws` is the relay's only event transport.
//! Clients send `chat-message` and `typing` frames and receive the
//! relayed events back on the same socket.

pub mod connection;
pub mod handler;
pub mod messages;
