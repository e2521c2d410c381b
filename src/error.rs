//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] is the central error type of the relay. Per-session
//! delivery errors are logged and recovered where they occur; only the
//! REST layer turns an error into a structured JSON response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::SessionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "session not found: 3f0c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Relay error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Delivery/Server | 500 Internal Server Error    |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Client sent a frame that is not a valid relay event.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// No live session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A caller-supplied session id collides with a live session.
    #[error("duplicate session id: {0}")]
    DuplicateId(SessionId),

    /// A session queue was full and its oldest events were dropped.
    #[error("outbound queue overflow for session {session_id}; {dropped} dropped so far")]
    QueueOverflow {
        /// Overflowing session.
        session_id: SessionId,
        /// Lifetime number of dropped events.
        dropped: u64,
    },

    /// Writing to a session's transport failed.
    #[error("transport write failed: {0}")]
    TransportWrite(String),

    /// A session stayed in `Draining` past the drain timeout.
    #[error("session {session_id} did not drain within {timeout_ms} ms")]
    DrainTimeout {
        /// Evicted session.
        session_id: SessionId,
        /// Configured drain timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidEvent(_) => 1001,
            Self::SessionNotFound(_) => 2001,
            Self::DuplicateId(_) => 2002,
            Self::Internal(_) => 3000,
            Self::QueueOverflow { .. } => 3001,
            Self::TransportWrite(_) => 3002,
            Self::DrainTimeout { .. } => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateId(_) => StatusCode::CONFLICT,
            Self::QueueOverflow { .. }
            | Self::TransportWrite(_)
            | Self::DrainTimeout { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
