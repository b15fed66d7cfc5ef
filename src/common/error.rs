//! Error types for tabletmaster

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Leadership Errors ===
    #[error("Catalog manager is not initialized: {0}")]
    NotInitialized(String),

    #[error("Not the leader: {0}")]
    NotLeader(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already present: {0}")]
    AlreadyPresent(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A broken precondition: the current operation is aborted, the process keeps running.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    // === Catalog Errors ===
    #[error("Catalog error: {0}")]
    Catalog(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotInitialized(_)
                | Error::NotLeader(_)
                | Error::ServiceUnavailable(_)
                | Error::Timeout(_)
                | Error::Network(_)
                | Error::Http(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Status kind carried inside the application error envelope
    pub fn status_code(&self) -> crate::master::messages::StatusCode {
        use crate::master::messages::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NotFound,
            Error::AlreadyPresent(_) => StatusCode::AlreadyPresent,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) => StatusCode::InvalidArgument,
            Error::IllegalState(_) | Error::NotLeader(_) => StatusCode::IllegalState,
            Error::NotInitialized(_) | Error::ServiceUnavailable(_) => {
                StatusCode::ServiceUnavailable
            }
            Error::Timeout(_) => StatusCode::TimedOut,
            Error::Network(_) | Error::Http(_) => StatusCode::NetworkError,
            Error::Io(_) => StatusCode::IoError,
            _ => StatusCode::RuntimeError,
        }
    }

    /// Convert to HTTP status for transport-level failures
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NotInitialized(_) | Error::NotLeader(_) | Error::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Prefix the message with context, keeping the variant.
    pub fn prepend(self, context: &str) -> Self {
        match self {
            Error::NotInitialized(m) => Error::NotInitialized(format!("{}: {}", context, m)),
            Error::NotLeader(m) => Error::NotLeader(format!("{}: {}", context, m)),
            Error::ServiceUnavailable(m) => {
                Error::ServiceUnavailable(format!("{}: {}", context, m))
            }
            Error::NotFound(m) => Error::NotFound(format!("{}: {}", context, m)),
            Error::AlreadyPresent(m) => Error::AlreadyPresent(format!("{}: {}", context, m)),
            Error::InvalidArgument(m) => Error::InvalidArgument(format!("{}: {}", context, m)),
            Error::IllegalState(m) => Error::IllegalState(format!("{}: {}", context, m)),
            Error::Catalog(m) => Error::Catalog(format!("{}: {}", context, m)),
            Error::Network(m) => Error::Network(format!("{}: {}", context, m)),
            Error::Timeout(m) => Error::Timeout(format!("{}: {}", context, m)),
            other => Error::Internal(format!("{}: {}", context, other)),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::messages::StatusCode;

    #[test]
    fn test_retryable() {
        assert!(Error::NotLeader("m1".into()).is_retryable());
        assert!(Error::NotInitialized("loading".into()).is_retryable());
        assert!(!Error::NotFound("ts".into()).is_retryable());
        assert!(!Error::IllegalState("broken".into()).is_retryable());
    }

    #[test]
    fn test_prepend_keeps_variant() {
        let err = Error::NotFound("tablet t1".into()).prepend("Unable to lookup TS");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Unable to lookup TS: tablet t1");
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Error::NotFound("x".into()).status_code(), StatusCode::NotFound);
        assert_eq!(
            Error::NotInitialized("x".into()).status_code(),
            StatusCode::ServiceUnavailable
        );
        assert_eq!(Error::Catalog("x".into()).status_code(), StatusCode::RuntimeError);
    }
}
