//! Web dispatch errors with HTTP status code mapping.
//!
//! Application responses are plain text, the way a handler's own
//! `HTTP ERROR` directive renders. The explore API wraps the same errors in
//! JSON (see [`crate::handlers::explore`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relish_runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// No route, or a missing file (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// A file path escaping the web root (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed request data (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The handler failed (500).
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// The handler's result is not a valid response (500).
    #[error("bad response: {0}")]
    Directive(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Explicit `HTTP ERROR` / `HTTP CODE` from a handler.
    #[error("{message}")]
    Status { code: StatusCode, message: String },
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Forbidden(_) => StatusCode::FORBIDDEN,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            WebError::Status { code, .. } => *code,
            WebError::Runtime(_)
            | WebError::Directive(_)
            | WebError::Template(_)
            | WebError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        (
            status,
            [("content-type", "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}
