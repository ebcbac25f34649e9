//! Error kinds shared across the store, pipeline, query engine, and API.
//!
//! Every fallible operation returns one of these kinds so the HTTP layer
//! can map failures to status codes without string matching.

use axum::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Entity id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state transition, e.g. starting indexing while a run is active.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request input, surfaced as 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Semantic validation failure, surfaced as 422.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Feature disabled by configuration.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Optional dependency missing (embedding model, HEIF decoder, OCR).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Database or filesystem I/O failure.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Cooperative cancellation; propagated, never logged as an error.
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation; the process exits with code >= 2.
    #[error("fatal: {message}")]
    Fatal { message: String, exit_code: i32 },
}

/// Exit code when the on-disk schema is newer than the binary knows.
pub const EXIT_MIGRATION_REFUSED: i32 = 2;
/// Exit code for database corruption detected at startup.
pub const EXIT_DB_CORRUPT: i32 = 3;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) | Error::Fatal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind for structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::BadRequest(_) => "bad_request",
            Error::Invalid(_) => "invalid",
            Error::Forbidden(_) => "forbidden",
            Error::Unavailable(_) => "unavailable",
            Error::Storage(_) => "storage",
            Error::Cancelled => "cancelled",
            Error::Fatal { .. } => "fatal",
        }
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Error::Storage(err.into())
    }

    /// On-disk schema is newer than this binary supports.
    pub fn migration_refused(message: impl Into<String>) -> Self {
        Error::Fatal {
            message: message.into(),
            exit_code: EXIT_MIGRATION_REFUSED,
        }
    }

    /// Unrecoverable database corruption.
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Fatal {
            message: message.into(),
            exit_code: EXIT_DB_CORRUPT,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Invalid("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(Error::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::BadRequest("bad".into()).kind(), "bad_request");
        assert_eq!(Error::Invalid("bad".into()).kind(), "invalid");
    }
}
