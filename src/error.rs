//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur
//! during a run, from configuration problems to instrument I/O.
//!
//! The two variants that matter for the acquisition loop's retry policy are
//! `Communication` (the channel to a device is unresponsive or returned a
//! truncated reply) and `Parse` (the device answered, but the payload is
//! malformed). Both are *transient*: the loop reacts with escalating recovery
//! actions instead of aborting the sweep. Everything else is treated as a
//! programming or configuration defect and propagates.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Communication error with {device}: {reason}")]
    Communication { device: String, reason: String },

    #[error("Malformed response from {device}: {reason}")]
    Parse { device: String, reason: String },

    #[error("Instrument '{0}' is not connected")]
    NotConnected(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Storage error: {0}")]
    Storage(#[from] csv::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Shorthand for a communication failure on a named device.
    pub fn comm(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Communication {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a malformed response from a named device.
    pub fn parse(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the acquisition loop may retry after this error.
    ///
    /// Parse failures count as transient because a truncated trace read
    /// usually heals on the next query, exactly like a dropped byte on the
    /// serial line.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaqError::Communication { .. } | DaqError::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::comm("trigger", "port unresponsive");
        assert_eq!(
            err.to_string(),
            "Communication error with trigger: port unresponsive"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DaqError::comm("analyzer", "timeout").is_transient());
        assert!(DaqError::parse("analyzer", "truncated trace").is_transient());
        assert!(!DaqError::Configuration("averages must be >= 1".into()).is_transient());
        assert!(!DaqError::NotConnected("coil".into()).is_transient());
    }
}
