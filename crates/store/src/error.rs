//! Store-layer error types
//!
//! Engine faults are wrapped with operation context (which store, which
//! operation) before they leave this crate. The wrapping preserves the
//! lock-conflict classification: retry logic asks
//! [`StoreError::is_lock_conflict`] instead of matching variants.

use burrow_core::SerializeError;
use burrow_engine::EngineError;
use thiserror::Error;

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types for the record-store layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Configuration or precondition violation: duplicate partition names,
    /// registration after load, hooks added to an open store, merging
    /// units across environments. Fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine fault, wrapped with the store and operation it came from
    #[error("{context}: engine operation failed")]
    Engine {
        /// `store.operation` describing where the fault surfaced
        context: String,
        /// The underlying engine failure
        #[source]
        source: EngineError,
    },

    /// Key or value (de)serialization failed
    #[error("serialization failed in store '{store}'")]
    Serialize {
        /// Store whose serializer failed
        store: String,
        /// The underlying serializer failure
        #[source]
        source: SerializeError,
    },

    /// A required record was absent
    #[error("no value for key {key} in store '{store}'")]
    NotFound {
        /// Store that was searched
        store: String,
        /// Rendering of the missing key
        key: String,
    },

    /// A put interceptor vetoed the write
    #[error("put rejected by interceptor in store '{store}': {reason}")]
    Rejected {
        /// Store whose interceptor objected
        store: String,
        /// The interceptor's stated reason
        reason: String,
    },

    /// A work unit failed and its transaction was aborted
    #[error("work unit '{unit}' aborted")]
    UnitAborted {
        /// Name of the failed unit
        unit: String,
        /// The failure that forced the abort
        #[source]
        source: Box<StoreError>,
    },

    /// The retry budget was spent while still conflicting.
    ///
    /// Carries the terminal lock conflict when at least one attempt ran.
    #[error("retries exhausted after {attempts} attempt(s)")]
    RetriesExhausted {
        /// The configured attempt budget
        attempts: usize,
        /// The last conflict observed, if any attempt executed
        #[source]
        source: Option<Box<StoreError>>,
    },

    /// Closing the environment left failures behind after best-effort
    /// cleanup of every resource
    #[error("failed to close environment cleanly ({failures} failure(s), see logs)")]
    CloseFailed {
        /// Number of resources that failed to close
        failures: usize,
    },
}

impl StoreError {
    pub(crate) fn engine(context: impl Into<String>, source: EngineError) -> Self {
        StoreError::Engine {
            context: context.into(),
            source,
        }
    }

    /// True when the root cause is the engine's transient lock-conflict
    /// failure, the only class [`WorkUnit`](crate::WorkUnit) retries
    pub fn is_lock_conflict(&self) -> bool {
        match self {
            StoreError::Engine { source, .. } => source.is_lock_conflict(),
            StoreError::UnitAborted { source, .. } => source.is_lock_conflict(),
            _ => false,
        }
    }
}
