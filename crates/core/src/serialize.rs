//! Pluggable key/value serialization
//!
//! Every typed key and value crosses into the engine as an opaque byte
//! string produced by a [`Serializer`]. Secondary-index ordering and join
//! positioning compare those bytes directly, so a serializer must be
//! deterministic: the same value always yields the same encoding.
//!
//! Stock implementations:
//! - [`BincodeSerializer`] for any `serde` type
//! - [`Utf8Serializer`] for `String` keys (byte order = lexicographic order)
//! - [`BytesSerializer`] for raw byte values
//! - [`BigEndianU64Serializer`] for `u64` keys whose byte order must equal
//!   numeric order
//! - [`NullableSerializer`] to round-trip `Option<T>` through a reserved
//!   sentinel tag

use byteorder::{BigEndian, ByteOrder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

/// Result alias for serialization operations
pub type Result<T> = std::result::Result<T, SerializeError>;

/// Error raised by a [`Serializer`] implementation
#[derive(Debug, Error)]
pub enum SerializeError {
    /// Encoding a value into bytes failed
    #[error("encode failed: {0}")]
    Encode(String),

    /// Decoding bytes back into a value failed
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Converts a typed value to and from an opaque byte sequence.
///
/// Implementations must be pure: no side effects, and identical inputs must
/// produce identical outputs. An index whose key serializer violates this
/// silently diverges from query expectations.
pub trait Serializer<T>: Send + Sync {
    /// Encode a value into bytes
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes back into a value
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Serializer for any `serde` type, encoded with bincode
pub struct BincodeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeSerializer<T> {
    /// Create a new bincode serializer
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for BincodeSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| SerializeError::Decode(e.to_string()))
    }
}

/// Serializer for `String` keys as raw UTF-8 bytes.
///
/// Byte order equals lexicographic string order, which makes this the
/// default choice for range-searched index keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Serializer;

impl Serializer<String> for Utf8Serializer {
    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| SerializeError::Decode(e.to_string()))
    }
}

/// Identity serializer for raw byte values
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Serializer for `u64` keys as 8 big-endian bytes.
///
/// Big-endian keeps byte order identical to numeric order, unlike the
/// little-endian encoding bincode would produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigEndianU64Serializer;

impl Serializer<u64> for BigEndianU64Serializer {
    fn serialize(&self, value: &u64) -> Result<Vec<u8>> {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, *value);
        Ok(buf.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
        if bytes.len() != 8 {
            return Err(SerializeError::Decode(format!(
                "expected 8 bytes for u64 key, got {}",
                bytes.len()
            )));
        }
        Ok(BigEndian::read_u64(bytes))
    }
}

const TAG_NONE: u8 = 0;
const TAG_SOME: u8 = 1;

/// Wraps any serializer so `Option<T>` round-trips losslessly.
///
/// `None` encodes as a single reserved tag byte; `Some(v)` encodes as a
/// different tag byte followed by the inner encoding. The tag guarantees
/// the absent-value encoding is distinct from every valid `Some` payload.
pub struct NullableSerializer<S> {
    inner: S,
}

impl<S> NullableSerializer<S> {
    /// Wrap an inner serializer
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<T, S> Serializer<Option<T>> for NullableSerializer<S>
where
    S: Serializer<T>,
{
    fn serialize(&self, value: &Option<T>) -> Result<Vec<u8>> {
        match value {
            None => Ok(vec![TAG_NONE]),
            Some(v) => {
                let mut out = vec![TAG_SOME];
                out.extend_from_slice(&self.inner.serialize(v)?);
                Ok(out)
            }
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Option<T>> {
        match bytes.split_first() {
            None => Err(SerializeError::Decode("missing nullable tag".to_string())),
            Some((&TAG_NONE, rest)) if rest.is_empty() => Ok(None),
            Some((&TAG_NONE, _)) => Err(SerializeError::Decode(
                "trailing bytes after absent-value sentinel".to_string(),
            )),
            Some((&TAG_SOME, rest)) => Ok(Some(self.inner.deserialize(rest)?)),
            Some((&tag, _)) => Err(SerializeError::Decode(format!(
                "unknown nullable tag {tag:#04x}"
            ))),
        }
    }
}
