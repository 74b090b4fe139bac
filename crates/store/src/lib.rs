//! Record-store layer for burrowdb
//!
//! This crate turns the raw engine into an application-facing database:
//!
//! - [`Environment`]: registers stores, validates names, owns load/close
//! - [`Store`]: a typed primary store with hooks and owned indexes
//! - [`SecondaryIndex`]: derived, automatically maintained index views
//! - [`JoinFormula`]/[`Join`]: multi-index intersection queries
//! - [`WorkUnit`]: transactional unit of work with bounded conflict retry
//! - [`ScanDecision`] + [`Store::scan_mutate`]: in-place scan/mutate jobs
//!
//! Serializers come from `burrow-core`; the engine types a caller touches
//! (`Transaction`, `LockMode`, `EngineConfig`) are re-exported here so the
//! crate is self-contained to use.

pub mod env;
pub mod error;
pub mod hooks;
pub mod join;
pub mod scan;
pub mod secondary;
pub mod store;
pub mod work;

pub use burrow_core::{
    BigEndianU64Serializer, BincodeSerializer, BytesSerializer, NullableSerializer,
    SerializeError, Serializer, Utf8Serializer,
};
pub use burrow_engine::{EngineConfig, EngineError, LockMode, Transaction};

pub use env::Environment;
pub use error::{Result, StoreError};
pub use hooks::{PutHook, PutInterceptHook};
pub use join::{Join, JoinFormula};
pub use scan::ScanDecision;
pub use secondary::{SecondaryIndex, SecondaryIndexBuilder};
pub use store::{PreparedPut, PutOutcome, Store};
pub use work::{WorkUnit, DEFAULT_RETRY_ATTEMPTS};
