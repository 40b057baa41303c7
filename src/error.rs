//! Error types for the OAI-PMH proxy

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for the OAI-PMH proxy
pub type Result<T> = std::result::Result<T, Error>;

/// OAI-PMH proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend unreachable
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend or request deadline exceeded
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// Backend answered with something that is not a usable XML document
    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    /// Metadata transform step failed
    #[error("Transform error: {0}")]
    Transform(String),

    /// Continuation store could not persist or load an entry
    #[error("Continuation store error: {0}")]
    Store(String),

    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status reported to the harvesting client
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BackendUnavailable(_) | Self::BackendProtocol(_) => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code used in error documents
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::BackendUnavailable(_) => "backendUnavailable",
            Self::BackendTimeout(_) => "backendTimeout",
            Self::BackendProtocol(_) => "backendProtocol",
            Self::Transform(_) => "transform",
            Self::Store(_) => "store",
            Self::Xml(_) => "xml",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_failures_map_to_gateway_statuses() {
        assert_eq!(
            Error::BackendUnavailable("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::BackendProtocol("not xml".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::BackendTimeout("30s".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Transform("exit 6".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::BackendProtocol(String::new()).code(), "backendProtocol");
        assert_eq!(Error::Store(String::new()).code(), "store");
    }
}
