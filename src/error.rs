//! Error types for the rig.
//!
//! This module defines the primary error type, `RigError`, for the entire library.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of failures that occur while discovering devices and talking to them.
//!
//! ## Error Hierarchy
//!
//! - **`PortIo`**: Opening, writing to or reading from a serial port failed.
//! - **`Timeout`**: A bounded wait (port open, identification reply, GPS sentence) expired.
//! - **`Protocol`**: An expected reply never arrived or could not be understood.
//! - **`Validation`**: A port path, command, frequency or zoom value was rejected before any
//!   I/O was attempted.
//! - **`Orchestration`**: A startup phase failed. Only used for logging and reporting; the
//!   orchestrator never propagates it out of `run_startup`.
//! - **`Config`**: Settings could not be loaded or failed validation.
//!
//! Every variant maps to a stable machine-readable code via [`RigError::code`], and
//! [`ApiError`] is the structured shape handed to API consumers.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Every failure the rig can report. See the module docs for when each arises.
#[derive(Error, Debug)]
pub enum RigError {
    /// Opening, reading or writing a port failed.
    #[error("Serial I/O error on '{port}': {source}")]
    PortIo {
        /// Port the operation ran against
        port: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait expired.
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// The bound that expired
        after: Duration,
    },

    /// An expected reply never arrived or could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Input rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A startup phase failed.
    #[error("Startup phase '{phase}' failed: {message}")]
    Orchestration {
        /// Phase name, as in the startup events
        phase: String,
        /// What went wrong
        message: String,
    },

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Real ports were requested from a build without serial support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl RigError {
    /// Builds a [`RigError::PortIo`] for `port`.
    pub fn port_io(port: impl Into<String>, source: std::io::Error) -> Self {
        Self::PortIo {
            port: port.into(),
            source,
        }
    }

    /// Builds a [`RigError::Timeout`] for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            RigError::PortIo { .. } => "PORT_IO",
            RigError::Timeout { .. } => "TIMEOUT",
            RigError::Protocol(_) => "PROTOCOL",
            RigError::Validation(_) => "VALIDATION",
            RigError::Orchestration { .. } => "ORCHESTRATION",
            RigError::Config(_) => "CONFIG",
            RigError::SerialFeatureDisabled => "FEATURE_DISABLED",
        }
    }

    /// True for failures where the port itself could not be used.
    pub fn is_port_failure(&self) -> bool {
        matches!(
            self,
            RigError::PortIo { .. } | RigError::SerialFeatureDisabled
        )
    }
}

/// Structured error returned to API consumers.
///
/// `detail` carries the full debug rendering (including the source chain) and is only
/// populated when the application runs in development mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    /// Display text of the error
    pub message: String,
    /// Same value as [`RigError::code`]
    pub code: String,
    /// Debug rendering, development mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    /// Converts `err`, attaching its debug rendering when `development` is set.
    pub fn from_error(err: &RigError, development: bool) -> Self {
        Self {
            message: err.to_string(),
            code: err.code().to_string(),
            detail: development.then(|| format!("{err:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RigError::Validation("zoom must be a power of two".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: zoom must be a power of two"
        );
    }

    #[test]
    fn test_error_codes() {
        let io = RigError::port_io(
            "/dev/ttyUSB0",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.code(), "PORT_IO");
        assert!(io.is_port_failure());
        assert!(io.to_string().contains("/dev/ttyUSB0"));

        let timeout = RigError::timeout("*IDN? reply", Duration::from_millis(1500));
        assert_eq!(timeout.code(), "TIMEOUT");
        assert!(!timeout.is_port_failure());
    }

    #[test]
    fn test_api_error_hides_detail_outside_development() {
        let err = RigError::Protocol("garbled reply".into());

        let production = ApiError::from_error(&err, false);
        assert_eq!(production.code, "PROTOCOL");
        assert!(production.detail.is_none());

        let development = ApiError::from_error(&err, true);
        assert!(development
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("garbled reply")));
    }
}
