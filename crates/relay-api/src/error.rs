use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The single HTTP-facing error envelope. Every route handler funnels its
/// internal error type through here rather than leaking variant names to
/// clients.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub action: &'static str,
}

impl ApiError {
    fn new(error: &'static str, message: impl Into<String>, action: &'static str) -> Self {
        Self {
            error,
            message: message.into(),
            action,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            "UNAUTHORIZED",
            "Missing or invalid bearer credential",
            "Pass a valid Authorization: Bearer header",
        )
    }

    pub fn invalid_session_id() -> Self {
        Self::new(
            "INVALID_SESSION_ID",
            "Session id is not a canonical UUID v4",
            "Use the id returned by GET /api/sessions",
        )
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new("INVALID_PATH", message, "Provide a path under a configured project root")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message, "Choose a path under a configured project root")
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(
            "NOT_FOUND",
            format!("{resource} not found"),
            "Check the id and retry",
        )
    }

    pub fn dir_not_found(message: impl Into<String>) -> Self {
        Self::new("DIR_NOT_FOUND", message, "Verify the directory exists and retry")
    }

    pub fn rate_limited() -> Self {
        Self::new(
            "RATE_LIMITED",
            "Too many attach attempts for this session",
            "Wait a few seconds and retry",
        )
    }

    pub fn session_attached() -> Self {
        Self::new(
            "SESSION_ATTACHED",
            "Another client already has an active terminal connection to this session",
            "Close the CLI on your host first, or pick a different session",
        )
    }

    pub fn session_conflict() -> Self {
        Self::new(
            "SESSION_CONFLICT",
            "The assistant CLI is already running for this session on the host",
            "Close the CLI on your host first, or pick a different session",
        )
    }

    pub fn max_sessions() -> Self {
        Self::new(
            "MAX_SESSIONS",
            "Maximum concurrent session count reached",
            "Kill an existing session before creating another",
        )
    }

    pub fn timeout() -> Self {
        Self::new("TIMEOUT", "The operation timed out", "Retry the request")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new("UNKNOWN", message, "Retry, and report if the problem persists")
    }
}

#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl ApiErrorResponse {
    pub fn new(status: StatusCode, error: ApiError) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        (self.status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<(StatusCode, ApiError)> for ApiErrorResponse {
    fn from((status, error): (StatusCode, ApiError)) -> Self {
        Self { status, error }
    }
}

impl From<relay_core::InvalidSessionId> for ApiErrorResponse {
    fn from(_: relay_core::InvalidSessionId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ApiError::invalid_session_id())
    }
}

impl From<relay_mux::MuxError> for ApiErrorResponse {
    fn from(err: relay_mux::MuxError) -> Self {
        match err {
            relay_mux::MuxError::SessionAttached(_) => {
                Self::new(StatusCode::CONFLICT, ApiError::session_attached())
            }
            relay_mux::MuxError::SessionConflict(_) => {
                Self::new(StatusCode::CONFLICT, ApiError::session_conflict())
            }
            relay_mux::MuxError::MaxSessions => {
                Self::new(StatusCode::CONFLICT, ApiError::max_sessions())
            }
            relay_mux::MuxError::Spawn { .. } | relay_mux::MuxError::Io(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::unknown(err.to_string()),
            ),
        }
    }
}

impl From<relay_discovery::RootsError> for ApiErrorResponse {
    fn from(err: relay_discovery::RootsError) -> Self {
        match err {
            relay_discovery::RootsError::NotADirectory => {
                Self::new(StatusCode::BAD_REQUEST, ApiError::invalid_path(err.to_string()))
            }
            relay_discovery::RootsError::OutsideRoots => {
                Self::new(StatusCode::FORBIDDEN, ApiError::forbidden(err.to_string()))
            }
            relay_discovery::RootsError::Io(e) => Self::new(
                StatusCode::NOT_FOUND,
                ApiError::dir_not_found(e.to_string()),
            ),
        }
    }
}
