//! Put hooks and interceptors
//!
//! Both run synchronously on the caller's thread, inside the put. An
//! interceptor sees the typed key and value before serialization and may
//! veto; a hook observes the write after it has been staged, with both the
//! typed and raw forms in hand.

use crate::error::Result;
use crate::store::Store;

/// Observational hook fired after a write is staged in the transaction.
///
/// For [`Store::put_no_overwrite`](crate::Store::put_no_overwrite) the hook
/// fires only when the write actually happened.
pub trait PutHook<K, V>: Send + Sync {
    /// Called with the typed and serialized forms of the written record
    fn put_happened(&self, key: &K, raw_key: &[u8], value: &V, raw_value: &[u8], store: &Store<K, V>);
}

/// Interceptor that may veto a put before serialization is finalized.
///
/// Returning an error aborts the put; nothing is serialized or written and
/// no [`PutHook`] fires.
pub trait PutInterceptHook<K, V>: Send + Sync {
    /// Inspect (and possibly reject) the record about to be written
    fn intercept(&self, key: &K, value: &V) -> Result<()>;
}
