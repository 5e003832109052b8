use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - A specific session id was not found.
    SessionNotFound(String),
    /// 400 - A session id that is not a 32-char hex token.
    InvalidSessionId(String),
    /// 500 - Resource allocation or pipeline launch failed.
    SessionCreateFailed(String),
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 404 - A specific workspace file was not found.
    FileNotFound(String),
    /// 400 - File extension outside the allow-list.
    FileTypeNotAllowed(String),
    /// 502 - The control API could not be reached from the public tier.
    UpstreamUnavailable(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionCreateFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::FileTypeNotAllowed(_) => StatusCode::BAD_REQUEST,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::InvalidSessionId(_) => "invalid_session_id",
            ApiError::SessionCreateFailed(_) => "session_create_failed",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::FileNotFound(_) => "file_not_found",
            ApiError::FileTypeNotAllowed(_) => "file_type_not_allowed",
            ApiError::UpstreamUnavailable(_) => "upstream_unavailable",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
            ApiError::InvalidSessionId(id) => format!("Invalid session id: {}.", id),
            ApiError::SessionCreateFailed(detail) => {
                format!("Failed to create session: {}.", detail)
            }
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::FileNotFound(name) => format!("File not found: {}.", name),
            ApiError::FileTypeNotAllowed(name) => {
                format!("File type not allowed: {}.", name)
            }
            ApiError::UpstreamUnavailable(detail) => {
                format!("Session service unavailable: {}.", detail)
            }
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
