//! Error types and handling for the session coordinator
//!
//! Errors never cross the coordinator boundary as return values. Every failure
//! a request produces is written to the observable `last_error` slot of the
//! [`SessionSnapshot`](crate::SessionSnapshot) and emitted as a
//! [`SessionEvent::RequestFailed`](crate::SessionEvent::RequestFailed).
//!
//! # Error Categories
//!
//! - **Identity Errors** - no user or device identity configured, fix config
//! - **Server Errors** - non-success status or malformed reply from the backend
//! - **Network Errors** - transport failures and timeouts, usually recoverable
//! - **Local Errors** - persistence, companion channel and serialization issues
//!
//! # Recovery Discipline
//!
//! ```rust,no_run
//! # use sosync_core::{SessionError, SessionSnapshot};
//! # fn example(snapshot: SessionSnapshot) {
//! match snapshot.last_error {
//!     Some(SessionError::MissingIdentity { field }) => {
//!         eprintln!("Configure {} before starting an SOS session", field);
//!     }
//!     Some(e) if e.is_recoverable() => {
//!         eprintln!("Temporary failure, safe to retry: {}", e);
//!     }
//!     Some(e) => eprintln!("Request failed: {}", e),
//!     None => {}
//! }
//! # }
//! ```

use thiserror::Error;

/// Result type alias for coordinator and collaborator operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the coordinator and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A session cannot be created without a user/device identity
    #[error("Missing required identity: {field}")]
    MissingIdentity { field: String },

    /// The backend replied with something that is not a usable record
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("No data in response")]
    NoData,

    /// Transport-level failure (connection refused, DNS, reset...)
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("Persistence error: {reason}")]
    PersistenceError { reason: String },

    #[error("Companion channel error: {reason}")]
    CompanionError { reason: String },

    #[error("Companion device unreachable")]
    CompanionUnreachable,

    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The coordinator task is gone (shut down or panicked)
    #[error("Coordinator stopped")]
    CoordinatorStopped,
}

impl SessionError {
    /// Create a missing identity error
    pub fn missing_identity(field: impl Into<String>) -> Self {
        Self::MissingIdentity { field: field.into() }
    }

    /// Create an invalid response error
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse { reason: reason.into() }
    }

    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Create a persistence error
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::PersistenceError { reason: reason.into() }
    }

    /// Create a companion channel error
    pub fn companion(reason: impl Into<String>) -> Self {
        Self::CompanionError { reason: reason.into() }
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::SerializationError { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { reason: reason.into() }
    }

    /// Check if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::NetworkError { .. } | SessionError::OperationTimeout { .. } => true,

            // Throttling and server-side faults
            SessionError::ServerError { status } => *status == 429 || *status >= 500,

            SessionError::MissingIdentity { .. }
            | SessionError::InvalidResponse { .. }
            | SessionError::NoData
            | SessionError::PersistenceError { .. }
            | SessionError::CompanionError { .. }
            | SessionError::CompanionUnreachable
            | SessionError::SerializationError { .. }
            | SessionError::InvalidConfiguration { .. }
            | SessionError::CoordinatorStopped => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::MissingIdentity { .. } => "identity",

            SessionError::InvalidResponse { .. }
            | SessionError::ServerError { .. }
            | SessionError::NoData => "server",

            SessionError::NetworkError { .. } | SessionError::OperationTimeout { .. } => "network",

            SessionError::PersistenceError { .. } | SessionError::SerializationError { .. } => {
                "storage"
            }

            SessionError::CompanionError { .. } | SessionError::CompanionUnreachable => {
                "companion"
            }

            SessionError::InvalidConfiguration { .. } | SessionError::CoordinatorStopped => {
                "system"
            }
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}
