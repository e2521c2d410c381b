//! Session and relay statistics DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::SessionInfo;

/// Response body for `GET /api/v1/stats`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Number of live sessions.
    pub live_sessions: usize,
    /// Sessions currently in `Draining`.
    pub draining_sessions: usize,
    /// Last chat sequence number assigned.
    pub last_seq: u64,
    /// Per-session queue capacity.
    pub queue_capacity: usize,
    /// Queue length at which a draining session recovers.
    pub queue_low_water_mark: usize,
    /// Drain timeout in milliseconds.
    pub drain_timeout_ms: u64,
    /// Typing debounce window in milliseconds.
    pub typing_debounce_ms: u64,
}

/// Response body for `GET /api/v1/sessions`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    /// Live sessions in registration order.
    pub data: Vec<SessionInfo>,
    /// Number of entries in `data`.
    pub total: usize,
}
