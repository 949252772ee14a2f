//! Error types for the content cache.

use thiserror::Error;

use crate::types::ContentId;

/// Fault reported by the underlying persistence engine. The cache never
/// retries; the caller owns the retry (or full-resync) policy.
#[derive(Debug, Clone, Error)]
#[error("storage engine fault: {0}")]
pub struct StorageError(pub String);

/// Errors surfaced by the local cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The persistence engine failed to read, write or commit.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors surfaced by the remote service collaborator.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure (connection, timeout, protocol).
    #[error("transport error: {0}")]
    Transport(String),

    /// Structured validation failure for a mutation. Not handled by the
    /// cache core; surfaced to the caller untouched.
    #[error("validation failed: {code} - {message}")]
    Validation { code: String, message: String },

    /// The remote no longer knows the content.
    #[error("content not found: {0}")]
    NotFound(ContentId),

    /// Any other server-side failure.
    #[error("remote service error: {0}")]
    Service(String),
}

/// Errors from the feed synchronization surface, which touches both the
/// remote service and the local cache.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
