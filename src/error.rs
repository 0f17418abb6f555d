//! Error types for Toolgate
//!
//! This module defines the error taxonomy used throughout the client, using
//! `thiserror` for ergonomic error handling. Every fallible library
//! operation returns [`Result`], so callers can match on the variant to
//! decide whether to retry, surface, or ignore a failure.

use std::time::Duration;

use thiserror::Error;

use crate::mcp::schema::ValidationError;

/// Main error type for Toolgate operations
///
/// Variants map one-to-one onto the failure classes of the protocol client:
/// transport failures, protocol violations, timeouts, server-side JSON-RPC
/// errors, and tool-level failures.
#[derive(Error, Debug)]
pub enum ToolgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The underlying channel failed (connect refused, write failed, HTTP
    /// status error). Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote end closed the stream. Not retryable.
    #[error("Transport closed: end of stream")]
    Eof,

    /// The `initialize` exchange failed or returned an incomplete result.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The peer broke the JSON-RPC contract (mismatched id, malformed
    /// envelope). Never retried.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// No response arrived within the allotted time.
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// The JSON-RPC method that timed out
        method: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error object.
    #[error("Server returned error {code} for '{method}': {message}")]
    Rpc {
        /// The JSON-RPC method that failed
        method: String,
        /// JSON-RPC error code
        code: i64,
        /// Error message from the server
        message: String,
        /// Optional structured error data
        data: Option<serde_json::Value>,
    },

    /// A tool name was not present in the discovered set.
    #[error("Tool not found: {name} (available: {})", .available.join(", "))]
    ToolNotFound {
        /// The requested tool name
        name: String,
        /// Sorted names of all discovered tools
        available: Vec<String>,
    },

    /// Arguments did not satisfy the tool's input schema.
    #[error("Invalid arguments for tool '{tool}': {}", format_validation_errors(.errors))]
    InvalidArguments {
        /// The tool being invoked
        tool: String,
        /// Every schema violation found
        errors: Vec<ValidationError>,
    },

    /// The tool ran but reported failure (`isError: true`).
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// The tool being invoked
        tool: String,
        /// The failure message extracted from the result
        message: String,
    },

    /// An operation required an active session.
    #[error("Session inactive: {0}")]
    SessionInactive(String),

    /// A session was entered twice.
    #[error("Session cannot be entered from state {0}")]
    SessionReentry(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Toolgate operations
pub type Result<T> = std::result::Result<T, ToolgateError>;

/// Coarse error classification used for metrics labels and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration problem
    Config,
    /// Transport failure, including end of stream
    Transport,
    /// Handshake failure
    Handshake,
    /// Protocol violation
    Protocol,
    /// Request timeout
    Timeout,
    /// Server JSON-RPC error
    Rpc,
    /// Tool lookup, validation, or execution failure
    Tool,
    /// Session lifecycle misuse
    Session,
    /// Local IO or (de)serialization failure
    Local,
}

impl ErrorKind {
    /// Stable lowercase label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Handshake => "handshake",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Rpc => "rpc",
            ErrorKind::Tool => "tool",
            ErrorKind::Session => "session",
            ErrorKind::Local => "local",
        }
    }
}

impl ToolgateError {
    /// Whether the connection supervisor should retry after this error.
    ///
    /// Only transport and handshake failures are retried. End of stream is a
    /// transport failure but is final: the peer went away on purpose.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolgate::error::ToolgateError;
    ///
    /// assert!(ToolgateError::Transport("refused".into()).is_retryable());
    /// assert!(!ToolgateError::Eof.is_retryable());
    /// assert!(!ToolgateError::Protocol("bad id".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolgateError::Transport(_) | ToolgateError::Handshake(_)
        )
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolgateError::Config(_) => ErrorKind::Config,
            ToolgateError::Transport(_) | ToolgateError::Eof => ErrorKind::Transport,
            ToolgateError::Handshake(_) => ErrorKind::Handshake,
            ToolgateError::Protocol(_) => ErrorKind::Protocol,
            ToolgateError::Timeout { .. } => ErrorKind::Timeout,
            ToolgateError::Rpc { .. } => ErrorKind::Rpc,
            ToolgateError::ToolNotFound { .. }
            | ToolgateError::InvalidArguments { .. }
            | ToolgateError::ToolExecution { .. } => ErrorKind::Tool,
            ToolgateError::SessionInactive(_) | ToolgateError::SessionReentry(_) => {
                ErrorKind::Session
            }
            ToolgateError::Io(_) | ToolgateError::Serialization(_) | ToolgateError::Yaml(_) => {
                ErrorKind::Local
            }
        }
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
