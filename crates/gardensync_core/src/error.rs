//! Error types for the core repository contracts.

use thiserror::Error;

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a content-store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage backend failed (I/O, connection, query).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded into its entity shape.
    #[error("invalid row for id {id}: {message}")]
    InvalidRow {
        /// Identifier of the offending row.
        id: String,
        /// What was wrong with it.
        message: String,
    },
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
