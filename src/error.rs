//! Error types for plug
//!
//! Two families of errors live here:
//! - [`Error`] is returned synchronously by API calls (construction, configuration,
//!   persistence, state guards).
//! - [`ConnectionError`] is the outcome of a request that reached the
//!   `CompletedWithError` state. It is cheap to clone so it can be handed to every
//!   failure callback and broadcast on the event bus.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for plug operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for plug
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_simultaneous")
        key: Option<String>,
    },

    /// A request URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as supplied by the caller
        url: String,
        /// Why parsing failed
        reason: String,
    },

    /// Operation is not allowed in the connection's current state
    #[error("cannot {operation} connection in state {state}")]
    InvalidState {
        /// The operation that was attempted (e.g., "set headers")
        operation: String,
        /// The state that prevents the operation
        state: String,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised while building the HTTP session
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine is shutting down and no longer accepts work
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::InvalidState { .. } => "invalid_state",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Category of a request failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// The host could not be reached (DNS, refused, offline)
    Connectivity,
    /// The transport gave up waiting
    Timeout,
    /// The request could not be built or sent
    Request,
    /// The response body could not be read or stored
    Body,
    /// The downloaded file could not be moved into the temp directory
    TempFile,
    /// Anything else reported by the transport
    Other,
}

impl ConnectionErrorKind {
    /// Machine-readable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorKind::Connectivity => "connectivity",
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::Request => "request",
            ConnectionErrorKind::Body => "body",
            ConnectionErrorKind::TempFile => "temp_file",
            ConnectionErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a single request
///
/// Non-2xx HTTP statuses are not failures; they are reported through the
/// connection's status code. Only transport-level problems end up here.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ConnectionError {
    /// Failure category
    pub kind: ConnectionErrorKind,
    /// Human-readable detail from the transport
    pub message: String,
}

impl ConnectionError {
    /// Create a new connection error
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a connectivity failure
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Connectivity, message)
    }

    /// Whether the host could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        self.kind == ConnectionErrorKind::Connectivity
    }
}

impl From<&reqwest::Error> for ConnectionError {
    fn from(e: &reqwest::Error) -> Self {
        let kind = if e.is_connect() {
            ConnectionErrorKind::Connectivity
        } else if e.is_timeout() {
            ConnectionErrorKind::Timeout
        } else if e.is_body() || e.is_decode() {
            ConnectionErrorKind::Body
        } else if e.is_request() || e.is_builder() || e.is_redirect() {
            ConnectionErrorKind::Request
        } else {
            ConnectionErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ConnectionErrorKind::Body, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct_per_family() {
        let cases = vec![
            (
                Error::Config {
                    message: "zero slots".into(),
                    key: Some("max_simultaneous".into()),
                },
                "config_error",
            ),
            (
                Error::InvalidUrl {
                    url: "ht!!tp://".into(),
                    reason: "relative URL without a base".into(),
                },
                "invalid_url",
            ),
            (
                Error::InvalidState {
                    operation: "set headers".into(),
                    state: "Running".into(),
                },
                "invalid_state",
            ),
            (
                Error::Database(DatabaseError::QueryFailed("locked".into())),
                "database_error",
            ),
            (Error::ShuttingDown, "shutting_down"),
            (Error::Other("boom".into()), "internal_error"),
        ];

        for (error, code) in cases {
            assert_eq!(error.error_code(), code, "wrong code for {error}");
        }
    }

    #[test]
    fn test_invalid_state_message_names_operation() {
        let error = Error::InvalidState {
            operation: "set headers".into(),
            state: "Running".into(),
        };
        assert_eq!(
            error.to_string(),
            "cannot set headers connection in state Running"
        );
    }

    #[test]
    fn test_connection_error_display_and_kind() {
        let error = ConnectionError::connectivity("connection refused");
        assert!(error.is_connectivity());
        assert_eq!(error.to_string(), "connectivity error: connection refused");

        let error = ConnectionError::new(ConnectionErrorKind::TempFile, "rename failed");
        assert!(!error.is_connectivity());
        assert_eq!(error.kind.as_str(), "temp_file");
    }

    #[test]
    fn test_connection_error_serializes_kind_in_snake_case() {
        let error = ConnectionError::new(ConnectionErrorKind::TempFile, "disk full");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "temp_file");
        assert_eq!(json["message"], "disk full");
    }

    #[test]
    fn test_io_error_maps_to_body_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let error = ConnectionError::from(io);
        assert_eq!(error.kind, ConnectionErrorKind::Body);
    }
}
