//! Error types for herdstore
//!
//! This module defines the common error type used throughout the system.

use crate::types::ObjectId;
use thiserror::Error;

/// Common result type for herdstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for herdstore
#[derive(Debug, Error)]
pub enum Error {
    /// A local disk refused I/O and no replacement disk is available, or
    /// the multi-disk layer is disabled.
    #[error("local disk I/O error")]
    Eio,

    /// Object missing after ring lookup and a full working-directory scan.
    #[error("object {0} not found")]
    NoObject(ObjectId),

    /// Transient status handed to request handlers while disk recovery is
    /// in flight; clients are expected to retry.
    #[error("network error, retry")]
    Network,

    /// Admin request that changed nothing.
    #[error("request had no effect")]
    Unknown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoObject(_))
    }
}
