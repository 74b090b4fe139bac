//! Engine error types
//!
//! The taxonomy separates the one recoverable failure class, lock
//! conflicts, from everything else. Callers that retry must key on
//! [`EngineError::is_lock_conflict`] rather than matching variants so the
//! classification survives wrapping at higher layers.

use thiserror::Error;

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types for the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another live transaction holds a conflicting lock on the record.
    ///
    /// This is the only engine failure assumed to be transient: aborting
    /// and retrying in a fresh transaction may succeed.
    #[error("lock conflict on partition '{partition}'")]
    LockConflict {
        /// Name of the partition holding the contested record
        partition: String,
    },

    /// The transaction has already committed or aborted
    #[error("transaction is no longer active")]
    TransactionClosed,

    /// Operation against a partition that is not open
    #[error("partition '{0}' is closed")]
    PartitionClosed(String),

    /// A partition with this name is already open
    #[error("partition '{0}' is already open")]
    AlreadyOpen(String),

    /// No partition with this name has ever been opened
    #[error("unknown partition '{0}'")]
    UnknownPartition(String),

    /// A secondary key-derivation callback failed
    #[error("key derivation failed for index '{partition}': {message}")]
    Derivation {
        /// Name of the secondary partition whose deriver failed
        partition: String,
        /// Description of the derivation failure
        message: String,
    },

    /// A unique secondary index rejected a second record under one key
    #[error("duplicate key in unique index '{partition}'")]
    UniqueConstraint {
        /// Name of the secondary partition
        partition: String,
    },

    /// A cursor operation that requires a position was called before one
    /// was established
    #[error("cursor is not positioned")]
    CursorNotPositioned,

    /// A join was built from cursors that do not belong to the primary
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// The engine has been closed
    #[error("engine is closed")]
    EngineClosed,
}

impl EngineError {
    /// True for the transient, retry-safe failure class
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, EngineError::LockConflict { .. })
    }
}
