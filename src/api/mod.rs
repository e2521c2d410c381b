//! REST API layer: route handlers, DTOs, router composition and the
//! OpenAPI document.
//!
//! Inspection endpoints are mounted under `/api/v1`; `/health` sits at the
//! root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "chat-relay", description = "Real-time chat relay inspection API"),
    paths(
        handlers::system::health_handler,
        handlers::sessions::get_stats,
        handlers::sessions::list_sessions,
        handlers::sessions::get_session,
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Sessions", description = "Live session inspection"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
