//! Crate-level error taxonomy.
//!
//! Every subsystem (`wal`, `store`, `executor`, `coordinator`) defines its
//! own [`thiserror`]-derived error enum; this module composes them into the
//! single [`EngineError`] returned from the public [`crate::engine`] API,
//! plus [`FailureKind`], the coarse classification carried in
//! `submit_batch`'s result so adapters don't need to match on the full
//! error tree.

use thiserror::Error;

use crate::coordinator::CommitError;
use crate::executor::DbError;
use crate::store::StoreError;
use crate::wal::WalError;

/// Top-level error type for the cache engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the segmented log, batch codec, producer, or
    /// consumer.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from the unified entity store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error originating from the SQL executor collaborator.
    #[error("db error: {0}")]
    Db(#[from] DbError),

    /// Error originating from the commit coordinator.
    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    /// The engine is still replaying the WAL and cannot accept new batches.
    #[error("engine not ready: still replaying")]
    NotReady,

    /// The submitted batch failed structural validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying filesystem I/O error not already wrapped by a subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Classify this error into the coarse [`FailureKind`] carried in
    /// [`crate::engine::SubmitResult`].
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Wal(WalError::Full) => FailureKind::WalFull,
            EngineError::Wal(WalError::Codec(_)) => FailureKind::CodecError,
            EngineError::Wal(_) => FailureKind::WalError,
            EngineError::Store(StoreError::CapacityExceeded { .. }) => {
                FailureKind::CapacityExceeded
            }
            EngineError::Store(_) => FailureKind::StoreError,
            EngineError::Db(DbError::Constraint(_)) => FailureKind::DbConstraint,
            EngineError::Db(_) => FailureKind::DbError,
            EngineError::Commit(CommitError::Timeout) => FailureKind::Timeout,
            EngineError::Commit(_) => FailureKind::CommitError,
            EngineError::NotReady => FailureKind::NotReady,
            EngineError::Validation(_) => FailureKind::ValidationError,
            EngineError::Io(_) => FailureKind::WalError,
            EngineError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// Coarse failure classification surfaced to adapters in `submit_batch`'s
/// result, independent of the full error tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Engine still replaying; batch was not accepted.
    NotReady,
    /// Log directory is full; engine is `Degraded`.
    WalFull,
    /// Other log-layer fault.
    WalError,
    /// Batch failed to decode or encode.
    CodecError,
    /// Store quota reached for a touched entity type.
    CapacityExceeded,
    /// Other store-layer fault.
    StoreError,
    /// DB rejected the batch due to a constraint violation.
    DbConstraint,
    /// Other executor-layer fault.
    DbError,
    /// Commit deadline exceeded.
    Timeout,
    /// Other coordinator-layer fault.
    CommitError,
    /// Submitted batch failed structural validation.
    ValidationError,
    /// Internal invariant violation.
    Internal,
}
