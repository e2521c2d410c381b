//! # chat-relay
//!
//! Real-time chat relay. Browser clients connect over WebSocket and send
//! two kinds of events: chat messages, which are rebroadcast to every
//! connected client, and "user is typing" indicators, which are debounced
//! per sender and relayed to everyone except the sender.
//!
//! There is no persistence, authentication, history or room concept.
//! Delivery is best-effort and isolated per recipient: every session has a
//! bounded drop-oldest queue, and a session that cannot keep up is evicted
//! after a drain timeout instead of slowing the others down.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket /ws, REST /api/v1)
//!     │
//!     ├── WS Transport (ws/)          REST Handlers (api/)
//!     │
//!     ├── LifecycleManager (service/)
//!     ├── Broadcaster ── TypingCoordinator (service/)
//!     │
//!     └── SessionRegistry ── Session queues (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full HTTP router: REST endpoints, `/ws` and, when
/// configured, static assets for the browser client.
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler));

    if let Some(dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
