//! Core types for burrowdb
//!
//! This crate holds the serialization boundary shared by every layer:
//! the [`Serializer`] trait and the stock implementations used for keys
//! and values. Stores, secondary indexes, and join positioning all compare
//! serialized bytes, so implementations here must be deterministic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod serialize;

pub use serialize::{
    BigEndianU64Serializer, BincodeSerializer, BytesSerializer, NullableSerializer,
    SerializeError, Serializer, Utf8Serializer,
};
