//! Error types for the hub
//!
//! Every fallible operation returns a [`HubResult`]. The [`ErrorKind`] is the
//! stable, machine-readable part of an error; it survives RPC round trips and
//! is what callers branch on. The message is for humans and logs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a hub error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Generic malformed request
    BadRequest,
    /// Bytes could not be decoded
    ParseFailure,
    /// A required field was missing or had an invalid value
    InvalidParam,
    /// Content decoded but failed validation rules
    ValidationFailure,
    /// Content is already present
    Duplicate,
    /// Content conflicts with newer stored state
    Conflict,
    /// The fid has no custody event yet
    UnknownUser,
    /// Requested entity does not exist
    NotFound,
    /// A dependency is not ready or not reachable
    Unavailable,
    /// Network call failed
    NetworkFailure,
    /// Durable storage failed
    StorageFailure,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Dotted error code, stable across versions
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ParseFailure => "bad_request.parse_failure",
            ErrorKind::InvalidParam => "bad_request.invalid_param",
            ErrorKind::ValidationFailure => "bad_request.validation_failure",
            ErrorKind::Duplicate => "bad_request.duplicate",
            ErrorKind::Conflict => "bad_request.conflict",
            ErrorKind::UnknownUser => "bad_request.unknown_user",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NetworkFailure => "unavailable.network_failure",
            ErrorKind::StorageFailure => "unavailable.storage_failure",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Bad requests are local and are never retried
    pub fn is_bad_request(&self) -> bool {
        self.code().starts_with("bad_request")
    }

    /// Unavailable errors may succeed later
    pub fn is_unavailable(&self) -> bool {
        self.code().starts_with("unavailable")
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type for hub operations
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct HubError {
    /// Machine-readable classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Underlying cause, if any
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HubError {
    /// Create an error without an underlying cause
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailure, message)
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParam, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unknown_user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownUser, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailure, message)
    }

    /// Error code of the kind, e.g. `bad_request.duplicate`
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl From<redb::DatabaseError> for HubError {
    fn from(e: redb::DatabaseError) -> Self {
        HubError::storage(format!("database error: {}", e)).with_cause(e)
    }
}

impl From<redb::TransactionError> for HubError {
    fn from(e: redb::TransactionError) -> Self {
        HubError::storage(format!("transaction error: {}", e)).with_cause(e)
    }
}

impl From<redb::TableError> for HubError {
    fn from(e: redb::TableError) -> Self {
        HubError::storage(format!("table error: {}", e)).with_cause(e)
    }
}

impl From<redb::StorageError> for HubError {
    fn from(e: redb::StorageError) -> Self {
        HubError::storage(format!("storage operation error: {}", e)).with_cause(e)
    }
}

impl From<redb::CommitError> for HubError {
    fn from(e: redb::CommitError) -> Self {
        HubError::storage(format!("commit error: {}", e)).with_cause(e)
    }
}

impl From<std::io::Error> for HubError {
    fn from(e: std::io::Error) -> Self {
        HubError::unavailable(format!("io error: {}", e)).with_cause(e)
    }
}

impl From<postcard::Error> for HubError {
    fn from(e: postcard::Error) -> Self {
        HubError::parse_failure(format!("decode error: {}", e)).with_cause(e)
    }
}

/// Serializable form of [`HubError`] used on the RPC wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&HubError> for WireError {
    fn from(e: &HubError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

impl From<WireError> for HubError {
    fn from(e: WireError) -> Self {
        HubError::new(e.kind, e.message)
    }
}

/// Result type alias using HubError
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::duplicate("message already merged");
        assert_eq!(
            format!("{}", err),
            "bad_request.duplicate: message already merged"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let hub_err: HubError = io_err.into();
        assert_eq!(hub_err.kind, ErrorKind::Unavailable);
        assert!(std::error::Error::source(&hub_err).is_some());
    }

    #[test]
    fn test_kind_families() {
        assert!(ErrorKind::ParseFailure.is_bad_request());
        assert!(ErrorKind::UnknownUser.is_bad_request());
        assert!(!ErrorKind::NotFound.is_bad_request());
        assert!(ErrorKind::StorageFailure.is_unavailable());
        assert!(!ErrorKind::Conflict.is_unavailable());
    }

    #[test]
    fn test_wire_error_keeps_kind() {
        let err = HubError::conflict("older event");
        let wire = WireError::from(&err);
        let back: HubError = wire.into();
        assert_eq!(back.kind, ErrorKind::Conflict);
        assert_eq!(back.message, "older event");
        assert!(back.cause.is_none());
    }
}
