//! Error types for the tether protocol.
//!
//! Exceptions reported by the host process are surfaced as
//! [`TetherError::RemoteException`] and propagate to the caller of the round
//! trip that triggered them. Protocol violations (malformed metas, broken
//! framing) fail only the call in flight; the object cache and callbacks
//! registry stay usable for subsequent calls.

use thiserror::Error;

/// Main error type for tether operations.
#[derive(Debug, Error)]
pub enum TetherError {
    // Host-reported failures
    #[error("Remote exception: {message}\n{stack}")]
    RemoteException { message: String, stack: String },

    #[error("Host error {code}: {message}")]
    HostError { code: i32, message: String },

    // Protocol violations
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unexpected meta kind: expected {expected}, got {got}")]
    UnexpectedMeta { expected: String, got: String },

    // Channel errors
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Connect to host at {addr} failed: {message}")]
    ConnectFailed { addr: String, message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Local misuse
    #[error("Value of kind {kind} is not callable")]
    NotCallable { kind: &'static str },

    #[error("Promise rejected: {reason}")]
    PromiseRejected { reason: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        TetherError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TetherError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Channel/connectivity error
    /// - -32001: Remote exception
    /// - -32002: Protocol violation
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            TetherError::ChannelClosed
            | TetherError::ConnectFailed { .. }
            | TetherError::Timeout(_) => -32000,

            TetherError::RemoteException { .. } | TetherError::PromiseRejected { .. } => -32001,

            TetherError::Protocol { .. }
            | TetherError::UnexpectedMeta { .. }
            | TetherError::Json { .. } => -32002,

            TetherError::Validation { .. } | TetherError::NotCallable { .. } => -32005,

            TetherError::HostError { code, .. } => *code,

            // All other errors are internal errors
            _ => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_exception_display_carries_message_and_stack() {
        let err = TetherError::RemoteException {
            message: "boom".into(),
            stack: "at hostFn (host.js:12)".into(),
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("at hostFn (host.js:12)"));
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(TetherError::ChannelClosed.to_rpc_error_code(), -32000);
        assert_eq!(
            TetherError::RemoteException {
                message: "x".into(),
                stack: String::new(),
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(
            TetherError::Protocol {
                message: "bad tag".into()
            }
            .to_rpc_error_code(),
            -32002
        );
    }
}
