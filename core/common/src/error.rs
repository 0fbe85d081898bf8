//! Common error types for the COSI storage client.

use std::fmt;
use thiserror::Error;

/// Object operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Put,
    Get,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Classification of a failure reported by the remote storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The object (or bucket) does not exist.
    NotFound,
    /// The credentials were accepted but lack permission.
    PermissionDenied,
    /// The credentials were rejected (including expired SAS tokens).
    Unauthenticated,
    /// Connectivity failures and any other remote error.
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::NotFound => "not found",
            TransportKind::PermissionDenied => "permission denied",
            TransportKind::Unauthenticated => "unauthenticated",
            TransportKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

/// Why an operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Top-level error type for storage client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The declared authentication type is not supported by the selected protocol.
    #[error("Invalid authentication type '{authentication_type}' for protocol {protocol}")]
    InvalidAuthenticationType {
        protocol: String,
        authentication_type: String,
    },

    /// A declared protocol has no matching secret payload.
    #[error("Missing credential for protocol {protocol}")]
    MissingCredential { protocol: String },

    /// None of the declared protocols is recognized.
    #[error("Unsupported protocols: {protocols:?}")]
    UnsupportedProtocol { protocols: Vec<String> },

    /// The remote storage call failed.
    #[error("{backend} {operation} '{key}' failed ({kind}): {message}")]
    Transport {
        backend: String,
        operation: Operation,
        key: String,
        kind: TransportKind,
        message: String,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("{operation} '{key}' {reason}")]
    Cancelled {
        operation: Operation,
        key: String,
        reason: CancelReason,
    },

    /// The upload stream did not yield the declared number of bytes.
    #[error("Size mismatch for '{key}': declared {declared} bytes, stream yielded {actual}")]
    SizeMismatch {
        key: String,
        declared: u64,
        actual: u64,
    },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this is a remote not-found failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                kind: TransportKind::NotFound,
                ..
            }
        )
    }

    /// Whether the operation was stopped by the caller's context.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
