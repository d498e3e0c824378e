//! Custom error types for the application.
//!
//! This module defines the primary error type, `BenchError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration and file issues to
//! instrument communication failures during a sweep.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors in the configuration or in the operator-entered
//!   sweep parameters (e.g. a non-positive control-voltage step).
//! - **`Instrument`**: Any send/query failure on an instrument session. Fatal to the
//!   current sweep and never retried by the sweep itself.
//! - **`Cancelled`**: Cooperative stop requested by the operator. Not a fault; the points
//!   emitted before the stop stay valid.
//! - **`Processing`**: Faults in result aggregation, which holds no hardware and
//!   propagates immediately.
//!
//! By using `#[from]`, `BenchError` can be created from the underlying error types,
//! so the `?` operator works across file, CSV and configuration code.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

/// Errors produced by the bench application.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tabular file could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Structured data could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Instrument communication failed.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// The operator cancelled the sweep.
    #[error("Sweep cancelled after {completed} point(s)")]
    Cancelled {
        /// Number of points emitted before the stop was honored
        completed: usize,
    },

    /// Result derivation failed.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// A sweep was requested while another one is still running.
    #[error("A sweep is already in progress")]
    SweepInProgress,

    /// The instruments have not been connected yet.
    #[error("Instruments are not connected")]
    NotConnected,

    /// Returning the instruments to their safe state failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<BenchError>),
}

impl BenchError {
    /// Whether this error is the operator's cancellation rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BenchError::Cancelled { .. })
    }

    /// Human readable summary including nested shutdown failures.
    pub fn describe(&self) -> String {
        match self {
            BenchError::ShutdownFailed(errors) => {
                let combined = errors
                    .iter()
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Shutdown failed: {combined}")
            }
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(value: toml::de::Error) -> Self {
        BenchError::Serialization(value.to_string())
    }
}

impl From<toml::ser::Error> for BenchError {
    fn from(value: toml::ser::Error) -> Self {
        BenchError::Serialization(value.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(value: serde_json::Error) -> Self {
        BenchError::Serialization(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_a_fault() {
        let err = BenchError::Cancelled { completed: 3 };
        assert!(err.is_cancellation());
        assert_eq!(err.to_string(), "Sweep cancelled after 3 point(s)");
        assert!(!BenchError::Instrument("timeout".into()).is_cancellation());
    }

    #[test]
    fn describes_shutdown_failure() {
        let err = BenchError::ShutdownFailed(vec![
            BenchError::Instrument("source output off".into()),
            BenchError::Instrument("analyzer auto cal".into()),
        ]);
        let message = err.describe();
        assert!(message.contains("source output off"));
        assert!(message.contains("analyzer auto cal"));
    }

    #[test]
    fn converts_toml_error() {
        let parse: Result<toml::Value, _> = toml::from_str("not = = toml");
        let err: BenchError = parse.unwrap_err().into();
        assert!(matches!(err, BenchError::Serialization(_)));
    }
}
