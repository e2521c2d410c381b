//! Session inspection handlers: relay stats, session list, session detail.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{SessionListResponse, StatsResponse};
use crate::app_state::AppState;
use crate::domain::{SessionId, SessionInfo, SessionState};
use crate::error::{ErrorResponse, RelayError};

/// `GET /stats`: Relay-wide counters and effective limits.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Sessions",
    summary = "Relay statistics",
    description = "Returns live and draining session counts, the last assigned sequence number and the effective queue and debounce settings.",
    responses(
        (status = 200, description = "Relay statistics", body = StatsResponse),
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let lifecycle = &state.lifecycle;
    let sessions = lifecycle.registry().snapshot().await;
    let draining_sessions = sessions
        .iter()
        .filter(|s| s.state() == SessionState::Draining)
        .count();
    let policy = lifecycle.queue_policy();

    Json(StatsResponse {
        live_sessions: sessions.len(),
        draining_sessions,
        last_seq: lifecycle.broadcaster().last_seq(),
        queue_capacity: policy.capacity,
        queue_low_water_mark: policy.low_water_mark,
        drain_timeout_ms: duration_ms(lifecycle.broadcaster().drain_timeout()),
        typing_debounce_ms: duration_ms(lifecycle.typing().debounce()),
    })
}

/// `GET /sessions`: List live sessions.
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "Sessions",
    summary = "List live sessions",
    description = "Returns every Connected or Draining session in registration order.",
    responses(
        (status = 200, description = "Live sessions", body = SessionListResponse),
    )
)]
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<SessionInfo> = state
        .lifecycle
        .registry()
        .snapshot()
        .await
        .iter()
        .map(|s| s.info())
        .collect();
    let total = data.len();
    Json(SessionListResponse { data, total })
}

/// `GET /sessions/{id}`: Get one session.
///
/// # Errors
///
/// Returns [`RelayError::SessionNotFound`] if the session is not live.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "Sessions",
    summary = "Get session details",
    description = "Returns state, queue depth and drop count for a single live session.",
    params(
        ("id" = String, Path, description = "Session id"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionInfo),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, RelayError> {
    let session = state
        .lifecycle
        .registry()
        .get(&SessionId::from(id))
        .await?;
    Ok(Json(session.info()))
}

fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Session routes (mounted under `/api/v1`).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
}
