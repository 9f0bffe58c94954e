//! Error types for dispatch operations.
//!
//! Transport errors (network, timeout) drive the `ERROR02` retry path in the
//! worker; everything else is infrastructure failure surfaced to the caller.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions raised while dispatching queued requests.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Network-level connectivity failure; the destination never produced a
    /// response.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// Database operation failed during dispatch.
    #[error("database error: {message}")]
    Database {
        /// Database error message.
        message: String,
    },

    /// Invalid engine or destination configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// The request body could not be decoded for its declared object type.
    #[error("payload error: {message}")]
    Payload {
        /// Payload error message.
        message: String,
    },

    /// Graceful shutdown did not finish within the allotted time.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Identifier of the panicked worker.
        worker_id: usize,
        /// Join error description.
        message: String,
    },
}

impl DispatchError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a payload error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload { message: message.into() }
    }

    /// True for failures where the request never reached the destination or
    /// no response came back — the worker's "server possibly unreachable"
    /// path.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

impl From<integrator_core::CoreError> for DispatchError {
    fn from(err: integrator_core::CoreError) -> Self {
        Self::Database { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_identified() {
        assert!(DispatchError::network("connection refused").is_transport());
        assert!(DispatchError::timeout(30).is_transport());
        assert!(!DispatchError::database("connection lost").is_transport());
        assert!(!DispatchError::payload("bad json").is_transport());
    }

    #[test]
    fn error_display_format() {
        let error = DispatchError::timeout(30);
        assert_eq!(error.to_string(), "request timeout after 30s");
    }
}
