// src/error.rs

//! Unified error handling for the harvester.
//!
//! Every failure is classified into an [`ErrorKind`] so the orchestrator can
//! decide between retrying an item, recording it as permanently failed, or
//! aborting the scope.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid source/scope combination or bad configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration value failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network, rate-limit or temporary server failure while fetching
    #[error("Transient fetch error for {context}: {message}")]
    TransientFetch { context: String, message: String },

    /// Network, rate-limit or temporary server failure while delivering
    #[error("Transient delivery error for {context}: {message}")]
    TransientDelivery { context: String, message: String },

    /// Malformed page or schema mismatch
    #[error("Parse error for {context}: {message}")]
    PermanentParse { context: String, message: String },

    /// Backend rejected the listing
    #[error("Delivery rejected for {context}: {message}")]
    PermanentDelivery { context: String, message: String },

    /// Durable checkpoint could not be read or written
    #[error("Checkpoint I/O error at {path}: {message}")]
    CheckpointIo { path: String, message: String },
}

/// Coarse classification of an error, recorded on failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    TransientFetch,
    TransientDelivery,
    PermanentParse,
    PermanentDelivery,
    CheckpointIo,
    Other,
}

impl ErrorKind {
    /// Whether failures of this kind are eligible for another attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::TransientFetch | ErrorKind::TransientDelivery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TransientFetch => "transient_fetch",
            ErrorKind::TransientDelivery => "transient_delivery",
            ErrorKind::PermanentParse => "permanent_parse",
            ErrorKind::PermanentDelivery => "permanent_delivery",
            ErrorKind::CheckpointIo => "checkpoint_io",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transient_fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientFetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn transient_delivery(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientDelivery {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::PermanentParse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::PermanentDelivery {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a checkpoint I/O error for the given durable location.
    pub fn checkpoint(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::CheckpointIo {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) | AppError::Validation(_) | AppError::Toml(_) => {
                ErrorKind::Configuration
            }
            AppError::TransientFetch { .. } => ErrorKind::TransientFetch,
            AppError::TransientDelivery { .. } => ErrorKind::TransientDelivery,
            AppError::PermanentParse { .. } | AppError::Json(_) | AppError::Url(_) => {
                ErrorKind::PermanentParse
            }
            AppError::PermanentDelivery { .. } => ErrorKind::PermanentDelivery,
            AppError::CheckpointIo { .. } => ErrorKind::CheckpointIo,
            AppError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorKind::TransientFetch
            }
            AppError::Http(_) | AppError::Io(_) => ErrorKind::Other,
        }
    }

    /// Whether this error should be retried in a later round.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Whether this error must abort the current scope.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::CheckpointIo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::transient_fetch("page 1", "timeout").is_transient());
        assert!(AppError::transient_delivery("offer 1", "503").is_transient());
        assert!(!AppError::parse("offer 1", "no ld+json").is_transient());
        assert!(!AppError::rejected("offer 1", "422").is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::config("unsupported breadth").is_fatal());
        assert!(AppError::checkpoint("/tmp/x.json", "denied").is_fatal());
        assert!(!AppError::transient_fetch("page", "timeout").is_fatal());
        assert!(!AppError::rejected("offer", "422").is_fatal());
    }

    #[test]
    fn test_io_error_is_not_retried() {
        let err = AppError::from(std::io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(!err.is_transient());
    }
}
