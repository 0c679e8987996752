//! Error types for the memoization layer
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by key construction, storage backends and engine configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key absent, or its envelope failed verification
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Call arguments could not be turned into a cache key
    #[error("Invalid key arguments: {0}")]
    InvalidKey(String),

    /// Engine or overlay constructed with an unusable setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stored parameter has no matching verifier
    #[error("No verifier registered for parameter: {0}")]
    Verification(String),

    /// Envelope could not be packed or unpacked
    #[error("Codec error: {0}")]
    Codec(String),
}

impl CacheError {
    /// Returns true for the miss condition the engine absorbs.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for storage and key operations.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Memo Error Enum ==
/// Error returned by a memoized call.
///
/// `Failed` carries the wrapped function's own error, shared between every
/// caller that awaited the same computation.
#[derive(Error, Debug)]
pub enum MemoError<E> {
    /// Storage, key or configuration failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The wrapped function failed
    #[error("{0}")]
    Failed(Arc<E>),
}

impl<E> MemoError<E> {
    /// Returns the underlying function error, if this is one.
    pub fn failure(&self) -> Option<&E> {
        match self {
            MemoError::Failed(err) => Some(err),
            MemoError::Cache(_) => None,
        }
    }
}

impl<E> Clone for MemoError<E> {
    fn clone(&self) -> Self {
        match self {
            MemoError::Cache(err) => MemoError::Cache(err.clone()),
            MemoError::Failed(err) => MemoError::Failed(Arc::clone(err)),
        }
    }
}
