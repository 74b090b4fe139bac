//! BurrowDB - Embedded transactional record store
//!
//! BurrowDB layers typed, indexed record stores on top of an embedded
//! transactional key/value engine. It provides:
//!
//! - **Stores**: typed primary key/value stores with pluggable serializers
//! - **Secondary indexes**: functionally derived, automatically maintained
//! - **Joins**: multi-index intersection queries without cursor bookkeeping
//! - **Work units**: retry-aware transactional units of work
//! - **Scan jobs**: in-place scan/mutate passes over a full store
//!
//! # Quick Start
//!
//! ```ignore
//! use burrowdb::{Environment, EngineConfig, Store, WorkUnit, Utf8Serializer, BincodeSerializer};
//! use std::sync::Arc;
//!
//! let env = Environment::new(EngineConfig::default());
//! let users = Store::new(
//!     &env,
//!     "users",
//!     Arc::new(Utf8Serializer),
//!     Arc::new(BincodeSerializer::new()),
//! );
//! env.register(users.clone())?;
//! env.load()?;
//!
//! WorkUnit::new(&env, "add-user", move |txn| {
//!     users.put(&"u1".to_string(), &user, txn)
//! })
//! .run_retry()?;
//! ```
//!
//! Internal engine details (lock table, partition layout, commit protocol)
//! are not exposed - only the record-store API is public.

// Re-export the public API from burrow-store
pub use burrow_store::*;
