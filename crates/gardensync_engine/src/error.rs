//! Error types for the sync engine.

use gardensync_core::{InstanceUrl, NodeId, StoreError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during reconciliation.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Failure to read or write a mapping record.
    ///
    /// Fatal to the entity being processed; the pass continues.
    #[error("mapping error for {local_id} -> {remote_id}: {message}")]
    Mapping {
        /// Local identifier of the entity.
        local_id: NodeId,
        /// Remote identifier that was being recorded or looked up.
        remote_id: NodeId,
        /// What went wrong.
        message: String,
    },

    /// Failure to write a remapped entity to the target.
    ///
    /// Fatal to the entity being processed; the pass continues.
    #[error("upsert error for {id}: {message}")]
    Upsert {
        /// Destination identifier of the entity.
        id: NodeId,
        /// What went wrong.
        message: String,
    },

    /// Failure to read or advance the sync cursor.
    ///
    /// Fatal to the entire pass: without a trustworthy watermark the
    /// caller must not assume progress was made.
    #[error("cursor error for target {target}: {message}")]
    Cursor {
        /// Target instance whose cursor failed.
        target: InstanceUrl,
        /// What went wrong.
        message: String,
    },

    /// Content-store failure outside the per-entity write path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote transport failure.
    #[error("remote error: {message}")]
    Remote {
        /// What went wrong.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// One leg of a bidirectional run failed; the other leg did not run
    /// (or its outcome is not reported).
    #[error("sync leg {source} -> {target} failed: {cause}")]
    Leg {
        /// Source instance of the failed leg.
        source: InstanceUrl,
        /// Target instance of the failed leg.
        target: InstanceUrl,
        /// The underlying failure.
        #[source]
        cause: Box<SyncError>,
    },

    /// A sync was requested while another is in flight.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a mapping error.
    pub fn mapping(local_id: NodeId, remote_id: NodeId, message: impl Into<String>) -> Self {
        Self::Mapping {
            local_id,
            remote_id,
            message: message.into(),
        }
    }

    /// Creates an upsert error.
    pub fn upsert(id: NodeId, message: impl Into<String>) -> Self {
        Self::Upsert {
            id,
            message: message.into(),
        }
    }

    /// Creates a cursor error.
    pub fn cursor(target: InstanceUrl, message: impl Into<String>) -> Self {
        Self::Cursor {
            target,
            message: message.into(),
        }
    }

    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error aborts only the entity being processed,
    /// not the whole pass.
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self, SyncError::Mapping { .. } | SyncError::Upsert { .. })
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Remote { retryable: true, .. })
    }
}
