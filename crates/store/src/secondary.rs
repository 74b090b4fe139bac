//! Derived secondary indexes
//!
//! A secondary index is a read-only view of its primary store, keyed by a
//! projection of the stored value. The engine keeps it physically in sync
//! on every committed mutation; this module supplies the projection and
//! the typed read API.
//!
//! Derivation comes in two shapes:
//! - single-key: `Fn(&V) -> Option<SK>`, where `None` excludes the record
//! - multi-key: `Fn(&V) -> Vec<SK>`, one entry per distinct key, an empty
//!   set excludes the record
//!
//! Either way the function must be referentially consistent: the same
//! value always derives the same key set, or the index silently diverges
//! from query expectations.

use crate::error::{Result, StoreError};
use crate::store::Store;
use burrow_core::Serializer;
use burrow_engine::{
    Engine, KeyDeriver, LockMode, Partition, SecondaryConfig, SecondaryPartition, Transaction,
};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Attachment hooks a primary store uses to drive its indexes
pub(crate) trait SecondaryAttachment: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self, engine: &Engine, primary: &Partition) -> Result<()>;
    fn close(&self) -> Result<()>;
}

pub(crate) enum Derivation<SK, V> {
    Single(Arc<dyn Fn(&V) -> Option<SK> + Send + Sync>),
    Multi(Arc<dyn Fn(&V) -> Vec<SK> + Send + Sync>),
}

impl<SK, V> Clone for Derivation<SK, V> {
    fn clone(&self) -> Self {
        match self {
            Derivation::Single(f) => Derivation::Single(f.clone()),
            Derivation::Multi(f) => Derivation::Multi(f.clone()),
        }
    }
}

/// Builder for a [`SecondaryIndex`]; finish with
/// [`attach`](SecondaryIndexBuilder::attach) before the environment loads.
pub struct SecondaryIndexBuilder<SK, V> {
    name: String,
    key_serializer: Arc<dyn Serializer<SK>>,
    derivation: Derivation<SK, V>,
    config: SecondaryConfig,
}

impl<SK, V> SecondaryIndexBuilder<SK, V>
where
    SK: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Whether several records may share one derived key (default true)
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.config.allow_duplicates = allow;
        self
    }

    /// Whether the projection is stable for a record's lifetime (default
    /// true). Mark mutable when updates may move a record between derived
    /// keys.
    pub fn immutable_key(mut self, immutable: bool) -> Self {
        self.config.immutable_key = immutable;
        self
    }

    /// Attach the index to its primary store. Rejected once the primary is
    /// open.
    pub fn attach<K>(self, primary: &Arc<Store<K, V>>) -> Result<Arc<SecondaryIndex<SK, V>>>
    where
        K: fmt::Debug + Send + Sync + 'static,
    {
        if primary.is_initialized() {
            return Err(StoreError::Config(format!(
                "cannot attach index '{}' to the open store '{}'",
                self.name,
                primary.name()
            )));
        }
        let index = Arc::new(SecondaryIndex {
            name: self.name,
            primary_name: primary.name().to_string(),
            key_serializer: self.key_serializer,
            value_serializer: primary.value_serializer_handle(),
            derivation: self.derivation,
            config: self.config,
            partition: RwLock::new(None),
        });
        primary.attach_index(index.clone());
        Ok(index)
    }
}

/// A derived, automatically maintained index over a primary store.
///
/// Holds a back-reference to the primary's value serializer for lookups;
/// ownership runs the other way (the primary owns its indexes).
pub struct SecondaryIndex<SK, V> {
    name: String,
    primary_name: String,
    key_serializer: Arc<dyn Serializer<SK>>,
    value_serializer: Arc<dyn Serializer<V>>,
    derivation: Derivation<SK, V>,
    config: SecondaryConfig,
    partition: RwLock<Option<SecondaryPartition>>,
}

impl<SK, V> fmt::Debug for SecondaryIndex<SK, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("name", &self.name)
            .field("primary_name", &self.primary_name)
            .finish()
    }
}

impl<SK, V> SecondaryIndex<SK, V>
where
    SK: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Start a single-key index: the projection yields at most one key,
    /// and `None` excludes the record from the index.
    pub fn single_key(
        name: impl Into<String>,
        key_serializer: Arc<dyn Serializer<SK>>,
        extract: impl Fn(&V) -> Option<SK> + Send + Sync + 'static,
    ) -> SecondaryIndexBuilder<SK, V> {
        SecondaryIndexBuilder {
            name: name.into(),
            key_serializer,
            derivation: Derivation::Single(Arc::new(extract)),
            config: SecondaryConfig::default(),
        }
    }

    /// Start a multi-key index: the record appears once per distinct
    /// derived key, and an empty set excludes it.
    pub fn multi_key(
        name: impl Into<String>,
        key_serializer: Arc<dyn Serializer<SK>>,
        extract: impl Fn(&V) -> Vec<SK> + Send + Sync + 'static,
    ) -> SecondaryIndexBuilder<SK, V> {
        SecondaryIndexBuilder {
            name: name.into(),
            key_serializer,
            derivation: Derivation::Multi(Arc::new(extract)),
            config: SecondaryConfig::default(),
        }
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact lookup: the first primary value whose derived key equals
    /// `key`, under the chosen isolation mode
    pub fn get(&self, key: &SK, txn: &mut Transaction, mode: LockMode) -> Result<Option<V>> {
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        match txn
            .get_secondary(&partition, &raw_key, mode)
            .map_err(|e| self.engine_err("get", e))?
        {
            Some(raw_value) => Ok(Some(self.deserialize_value(&raw_value)?)),
            None => Ok(None),
        }
    }

    /// Walk `(derived key, value)` pairs forward in index order from the
    /// inclusive search key until the visitor returns `false`
    pub fn search_forward<F>(&self, from: &SK, txn: &mut Transaction, mut visitor: F) -> Result<()>
    where
        F: FnMut(&SK, &V) -> bool,
    {
        let raw_from = self.serialize_key(from)?;
        let partition = self.partition()?;
        let mut cursor = partition.cursor(LockMode::Default);
        let mut entry = cursor
            .seek_range(txn, &raw_from)
            .map_err(|e| self.engine_err("search", e))?;
        while let Some((raw_skey, raw_value)) = entry {
            if !self.visit_entry(&raw_skey, &raw_value, &mut visitor)? {
                break;
            }
            entry = cursor.next(txn).map_err(|e| self.engine_err("search", e))?;
        }
        Ok(())
    }

    /// Walk `(derived key, value)` pairs backward in index order, starting
    /// from the position found for the search key, until the visitor
    /// returns `false`
    pub fn search_backward<F>(&self, from: &SK, txn: &mut Transaction, mut visitor: F) -> Result<()>
    where
        F: FnMut(&SK, &V) -> bool,
    {
        let raw_from = self.serialize_key(from)?;
        let partition = self.partition()?;
        let mut cursor = partition.cursor(LockMode::Default);
        let mut entry = cursor
            .seek_range(txn, &raw_from)
            .map_err(|e| self.engine_err("search", e))?;
        while let Some((raw_skey, raw_value)) = entry {
            if !self.visit_entry(&raw_skey, &raw_value, &mut visitor)? {
                break;
            }
            entry = cursor.prev(txn).map_err(|e| self.engine_err("search", e))?;
        }
        Ok(())
    }

    /// Walk forward from a raw partial-key prefix
    pub fn search_prefix<F>(
        &self,
        prefix: &[u8],
        txn: &mut Transaction,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&SK, &V) -> bool,
    {
        let partition = self.partition()?;
        let mut cursor = partition.cursor(LockMode::Default);
        let mut entry = cursor
            .seek_range(txn, prefix)
            .map_err(|e| self.engine_err("search", e))?;
        while let Some((raw_skey, raw_value)) = entry {
            if !self.visit_entry(&raw_skey, &raw_value, &mut visitor)? {
                break;
            }
            entry = cursor.next(txn).map_err(|e| self.engine_err("search", e))?;
        }
        Ok(())
    }

    /// Visit every record whose derived key equals `key`
    pub fn visit<F>(&self, key: &SK, txn: &mut Transaction, mut visitor: F) -> Result<()>
    where
        F: FnMut(&V),
    {
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        let mut cursor = partition.cursor(LockMode::Default);
        let mut entry = cursor
            .seek(txn, &raw_key)
            .map_err(|e| self.engine_err("visit", e))?;
        while let Some((raw_skey, raw_value)) = entry {
            if raw_skey != raw_key {
                break;
            }
            visitor(&self.deserialize_value(&raw_value)?);
            entry = cursor.next(txn).map_err(|e| self.engine_err("visit", e))?;
        }
        Ok(())
    }

    fn visit_entry<F>(&self, raw_skey: &[u8], raw_value: &[u8], visitor: &mut F) -> Result<bool>
    where
        F: FnMut(&SK, &V) -> bool,
    {
        let skey = self.deserialize_key(raw_skey)?;
        let value = self.deserialize_value(raw_value)?;
        Ok(visitor(&skey, &value))
    }

    pub(crate) fn partition(&self) -> Result<SecondaryPartition> {
        self.partition.read().clone().ok_or_else(|| {
            StoreError::Config(format!(
                "index '{}' is not initialized; call Environment::load() first",
                self.name
            ))
        })
    }

    pub(crate) fn serialize_key(&self, key: &SK) -> Result<Vec<u8>> {
        self.key_serializer
            .serialize(key)
            .map_err(|e| StoreError::Serialize {
                store: self.name.clone(),
                source: e,
            })
    }

    fn deserialize_key(&self, bytes: &[u8]) -> Result<SK> {
        self.key_serializer
            .deserialize(bytes)
            .map_err(|e| StoreError::Serialize {
                store: self.name.clone(),
                source: e,
            })
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<V> {
        self.value_serializer
            .deserialize(bytes)
            .map_err(|e| StoreError::Serialize {
                store: self.name.clone(),
                source: e,
            })
    }

    pub(crate) fn engine_err(
        &self,
        operation: &str,
        source: burrow_engine::EngineError,
    ) -> StoreError {
        StoreError::engine(format!("{}.{}", self.name, operation), source)
    }
}

impl<SK, V> SecondaryAttachment for SecondaryIndex<SK, V>
where
    SK: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, engine: &Engine, primary: &Partition) -> Result<()> {
        debug!(index = %self.name, primary = %self.primary_name, "opening index");
        let key_serializer = self.key_serializer.clone();
        let value_serializer = self.value_serializer.clone();
        let derivation = self.derivation.clone();
        let deriver: KeyDeriver = Arc::new(move |_pkey, raw_value| {
            let value = value_serializer
                .deserialize(raw_value)
                .map_err(|e| e.to_string())?;
            let mut keys: SmallVec<[Vec<u8>; 4]> = SmallVec::new();
            match &derivation {
                Derivation::Single(extract) => {
                    if let Some(key) = extract(&value) {
                        keys.push(key_serializer.serialize(&key).map_err(|e| e.to_string())?);
                    }
                }
                Derivation::Multi(extract) => {
                    for key in extract(&value) {
                        keys.push(key_serializer.serialize(&key).map_err(|e| e.to_string())?);
                    }
                }
            }
            Ok(keys)
        });
        let partition = engine
            .open_secondary(&self.name, primary, self.config, deriver)
            .map_err(|e| self.engine_err("open", e))?;
        *self.partition.write() = Some(partition);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(partition) = self.partition.write().take() {
            partition.close().map_err(|e| self.engine_err("close", e))?;
        }
        Ok(())
    }
}
