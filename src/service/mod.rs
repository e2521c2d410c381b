//! Service layer: fan-out, typing debounce and connection lifecycle.
//!
//! [`LifecycleManager`] is the entry point for transports. It drives the
//! [`Broadcaster`] and [`TypingCoordinator`], both of which read the live
//! set from the [`crate::domain::SessionRegistry`].

pub mod broadcaster;
pub mod delivery;
pub mod lifecycle;
pub mod typing;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use delivery::{EventSink, PumpExit, PumpOutcome, run_outbound_pump};
pub use lifecycle::{DisconnectReason, EventOutcome, LifecycleManager};
pub use typing::TypingCoordinator;
