//! Embedded transactional key/value engine for burrowdb
//!
//! This crate is the storage substrate the record-store layer sits on.
//! It provides:
//! - Named primary and secondary partitions with ordered byte keys
//! - ACID transactions with buffered writes and record-level locking
//! - Automatic secondary-index maintenance driven by key-derivation
//!   callbacks registered at partition open
//! - Forward/backward ordered cursors with exact, range, and prefix
//!   positioning
//! - A merge join cursor that intersects positioned secondary cursors
//!
//! Locking is two-phase and fail-fast: touching a record another live
//! transaction has locked raises [`EngineError::LockConflict`] immediately,
//! the one failure class callers may retry in a fresh transaction. With no
//! lock waits there are no deadlocks.
//!
//! Data lives in memory. Durability formats are the concern of a different
//! engine behind the same interface.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod cursor;
mod engine;
mod error;
mod lock;
mod partition;
mod txn;

pub use config::{EngineConfig, LockMode, PartitionConfig, SecondaryConfig};
pub use cursor::{Cursor, JoinCursor, ReadCursor, SecondaryCursor};
pub use engine::{Engine, Partition, SecondaryPartition};
pub use error::{EngineError, Result};
pub use partition::KeyDeriver;
pub use txn::Transaction;
