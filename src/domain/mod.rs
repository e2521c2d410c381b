//! Domain layer: session identity, session state, relay events and the
//! session registry.
//!
//! This module holds the server-side model that the service layer drives:
//! each connected client is a [`Session`] with a bounded outbound queue,
//! and the [`SessionRegistry`] is the single shared map of live sessions.

pub mod events;
pub mod session;
pub mod session_id;
pub mod session_registry;

pub use events::{ChatMessage, InboundEvent, OutboundEvent, TypingEvent};
pub use session::{Enqueued, QueuePolicy, Session, SessionInfo, SessionState};
pub use session_id::SessionId;
pub use session_registry::SessionRegistry;
