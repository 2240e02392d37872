//! Error types used throughout the ITSI client

use itsi_common::error::{ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Main error type for ITSI operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum ItsiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous match: {0}")]
    Ambiguous(String),

    #[error("API returned error {status}: {body}")]
    Api { status: u16, body: Value },

    #[error("Transport error (HTTP {status}): {message}")]
    Transport { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ItsiError {
    /// HTTP-equivalent status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Ambiguous(_) => 400,
            Self::Auth { status, .. } | Self::Api { status, .. } | Self::Transport { status, .. } => {
                *status
            }
            Self::NotFound(_) => 404,
            Self::Config(_) | Self::Serialization(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable label suitable for structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Auth { .. } => "auth",
            Self::NotFound(_) => "not_found",
            Self::Ambiguous(_) => "ambiguous",
            Self::Api { .. } => "api",
            Self::Transport { .. } => "transport",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Build the error for a non-2xx API response, routing 401/403 to `Auth`.
    pub fn from_status(status: u16, body: Value) -> Self {
        match status {
            401 | 403 => Self::Auth { status, message: body.to_string() },
            _ => Self::Api { status, body },
        }
    }
}

impl ErrorClassification for ItsiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { status, .. } | Self::Api { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound(_) => ErrorSeverity::Info,
            Self::Transport { .. } => ErrorSeverity::Warning,
            Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<serde_json::Error> for ItsiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for ITSI operations
pub type Result<T> = std::result::Result<T, ItsiError>;
