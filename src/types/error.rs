//! Error types for Courier
//!
//! Failures before the first response byte map to a clean HTTP status.
//! Failures after headers are committed surface as `Stream` and only ever
//! terminate the connection.

use hyper::StatusCode;

use crate::db::ResolveError;
use crate::storage::FetchError;

/// Main error type for Courier operations
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("{0}")]
    Fetch(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Client disconnected")]
    ClientGone,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Stream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Nobody is listening any more; the code only shows up in logs.
            Self::ClientGone => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::Error> for CourierError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<sqlx::Error> for CourierError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<ResolveError> for CourierError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => Self::NotFound("File not found".to_string()),
            ResolveError::Store(msg) => Self::Store(msg),
        }
    }
}

impl From<FetchError> for CourierError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(_) => Self::NotFound("No such key found".to_string()),
            FetchError::Transport(msg) => Self::Fetch(msg),
        }
    }
}

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;
