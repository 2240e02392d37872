//! Error classification shared by every ITSI crate.
//!
//! Errors across the workspace implement [`ErrorClassification`] so callers
//! can make uniform decisions about retries and log levels without matching
//! on crate-specific variants.
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Resource not found during discovery |
//! | **Warning** | Degraded but operational | Transient transport failures |
//! | **Error** | Failure requiring attention | Rejected credentials, validation errors |
//! | **Critical** | Integrity at risk | Internal invariant violations |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as network timeouts or server-side 5xx responses.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl ErrorSeverity {
    /// Stable lowercase label for structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky;

    impl ErrorClassification for Flaky {
        fn is_retryable(&self) -> bool {
            true
        }

        fn severity(&self) -> ErrorSeverity {
            ErrorSeverity::Warning
        }

        fn is_critical(&self) -> bool {
            false
        }
    }

    #[test]
    fn severity_orders_from_info_to_critical() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn severity_display_and_label() {
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Critical.as_str(), "critical");
    }

    #[test]
    fn retry_after_defaults_to_none() {
        let err = Flaky;
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }
}
