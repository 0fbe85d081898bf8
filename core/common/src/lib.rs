//! Common utilities and types shared across the COSI storage client crates.
//!
//! This module provides the error taxonomy and the small value types used by
//! the configuration model and every storage backend.

pub mod error;
pub mod types;

pub use error::{CancelReason, Error, Operation, Result, TransportKind};
pub use types::{ObjectKey, SecretString};
