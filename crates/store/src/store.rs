//! Typed primary record stores
//!
//! A [`Store`] maps a typed key to a typed value inside one named
//! partition. It owns its serializers, its hook and interceptor lists, and
//! its secondary indexes. Hooks and indexes are attached before the
//! environment loads; the partition handle appears at load time.

use crate::env::{Environment, StoreRegistration};
use crate::error::{Result, StoreError};
use crate::hooks::{PutHook, PutInterceptHook};
use crate::join::JoinFormula;
use crate::scan::ScanDecision;
use crate::secondary::{SecondaryAttachment, SecondaryIndex};
use crate::work::{WorkUnit, DEFAULT_RETRY_ATTEMPTS};
use burrow_core::{BytesSerializer, Serializer};
use burrow_engine::{Engine, LockMode, Partition, PartitionConfig, Transaction};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a [`Store::put_no_overwrite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was fresh and the write was staged
    Written,
    /// The key already exists; the prior value is untouched
    KeyExists,
}

/// A typed primary record store.
///
/// Identity is the store name, unique within its environment. Create with
/// [`Store::new`], register with
/// [`Environment::register`](crate::Environment), then operate inside
/// transactions once the environment has loaded.
pub struct Store<K, V> {
    name: String,
    env: Environment,
    key_serializer: Arc<dyn Serializer<K>>,
    value_serializer: Arc<dyn Serializer<V>>,
    hooks: RwLock<Vec<Arc<dyn PutHook<K, V>>>>,
    intercepts: RwLock<Vec<Arc<dyn PutInterceptHook<K, V>>>>,
    secondaries: RwLock<Vec<Arc<dyn SecondaryAttachment>>>,
    sorted_duplicates: AtomicBool,
    partition: RwLock<Option<Partition>>,
}

impl<K, V> Store<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a store. Nothing is opened until the environment loads.
    pub fn new(
        env: &Environment,
        name: impl Into<String>,
        key_serializer: Arc<dyn Serializer<K>>,
        value_serializer: Arc<dyn Serializer<V>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            env: env.clone(),
            key_serializer,
            value_serializer,
            hooks: RwLock::new(Vec::new()),
            intercepts: RwLock::new(Vec::new()),
            secondaries: RwLock::new(Vec::new()),
            sorted_duplicates: AtomicBool::new(false),
            partition: RwLock::new(None),
        })
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying partition has been opened
    pub fn is_initialized(&self) -> bool {
        self.partition.read().is_some()
    }

    /// Add an observational post-put hook. Rejected once the store is open.
    pub fn add_hook(&self, hook: Arc<dyn PutHook<K, V>>) -> Result<()> {
        self.ensure_not_open("add a hook to")?;
        self.hooks.write().push(hook);
        Ok(())
    }

    /// Add a put interceptor. Rejected once the store is open.
    pub fn add_intercept(&self, hook: Arc<dyn PutInterceptHook<K, V>>) -> Result<()> {
        self.ensure_not_open("add an interceptor to")?;
        self.intercepts.write().push(hook);
        Ok(())
    }

    /// Allow duplicate primary keys. Fixed before open.
    pub fn permit_duplicate_keys(&self) -> Result<()> {
        self.ensure_not_open("reconfigure")?;
        self.sorted_duplicates.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_not_open(&self, action: &str) -> Result<()> {
        if self.is_initialized() {
            Err(StoreError::Config(format!(
                "cannot {action} the open store '{}'",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    // === Point operations ===

    /// Write a record.
    ///
    /// Interceptors run first and may veto; then key and value are
    /// serialized and staged in the transaction; then post-put hooks
    /// observe the write.
    pub fn put(&self, key: &K, value: &V, txn: &mut Transaction) -> Result<()> {
        debug!(store = %self.name, "persisting record");
        for hook in self.intercepts.read().iter() {
            hook.intercept(key, value)?;
        }
        let raw_key = self.serialize_key(key)?;
        let raw_value = self.serialize_value(value)?;
        let partition = self.partition()?;
        txn.put(&partition, &raw_key, &raw_value)
            .map_err(|e| self.engine_err("put", e))?;
        for hook in self.hooks.read().iter() {
            hook.put_happened(key, &raw_key, value, &raw_value, self);
        }
        Ok(())
    }

    /// Write a record unless the key already exists.
    ///
    /// An existing key is a soft outcome, not an error, and leaves the
    /// prior value untouched. Hooks fire only when the write happened.
    pub fn put_no_overwrite(
        &self,
        key: &K,
        value: &V,
        txn: &mut Transaction,
    ) -> Result<PutOutcome> {
        debug!(store = %self.name, "persisting record (no overwrite)");
        for hook in self.intercepts.read().iter() {
            hook.intercept(key, value)?;
        }
        let raw_key = self.serialize_key(key)?;
        let raw_value = self.serialize_value(value)?;
        let partition = self.partition()?;
        let written = txn
            .put_no_overwrite(&partition, &raw_key, &raw_value)
            .map_err(|e| self.engine_err("put_no_overwrite", e))?;
        if !written {
            return Ok(PutOutcome::KeyExists);
        }
        for hook in self.hooks.read().iter() {
            hook.put_happened(key, &raw_key, value, &raw_value, self);
        }
        Ok(PutOutcome::Written)
    }

    /// Read a record under the chosen isolation mode
    pub fn get(&self, key: &K, txn: &mut Transaction, mode: LockMode) -> Result<Option<V>> {
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        match txn
            .get(&partition, &raw_key, mode)
            .map_err(|e| self.engine_err("get", e))?
        {
            Some(raw_value) => Ok(Some(self.deserialize_value(&raw_value)?)),
            None => Ok(None),
        }
    }

    /// Read a record, escalating absence to a hard failure
    pub fn get_required(&self, key: &K, txn: &mut Transaction, mode: LockMode) -> Result<V> {
        self.get(key, txn, mode)?.ok_or_else(|| StoreError::NotFound {
            store: self.name.clone(),
            key: format!("{key:?}"),
        })
    }

    /// Delete a record. Deleting an absent key is not an error.
    pub fn delete(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        txn.delete(&partition, &raw_key)
            .map_err(|e| self.engine_err("delete", e))
    }

    /// Copy a record from another store of the same shape.
    ///
    /// The raw bytes move untouched; an absent source key is a hard
    /// failure.
    pub fn copy_from(&self, key: &K, source: &Store<K, V>, txn: &mut Transaction) -> Result<()> {
        debug!(store = %self.name, source = %source.name, key = ?key, "copying record");
        let raw_value = source.read_raw_for_transfer(key, txn)?;
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        txn.put(&partition, &raw_key, &raw_value)
            .map_err(|e| self.engine_err("put", e))
    }

    /// Move a record from another store of the same shape: copy here,
    /// delete there, in one transaction.
    pub fn move_from(&self, key: &K, source: &Store<K, V>, txn: &mut Transaction) -> Result<()> {
        debug!(store = %self.name, source = %source.name, key = ?key, "moving record");
        let raw_value = source.read_raw_for_transfer(key, txn)?;
        let raw_key = self.serialize_key(key)?;
        let source_partition = source.partition()?;
        txn.delete(&source_partition, &raw_key)
            .map_err(|e| source.engine_err("delete", e))?;
        let partition = self.partition()?;
        txn.put(&partition, &raw_key, &raw_value)
            .map_err(|e| self.engine_err("put", e))
    }

    fn read_raw_for_transfer(&self, key: &K, txn: &mut Transaction) -> Result<Vec<u8>> {
        let raw_key = self.serialize_key(key)?;
        let partition = self.partition()?;
        txn.get(&partition, &raw_key, LockMode::ReadCommitted)
            .map_err(|e| self.engine_err("get", e))?
            .ok_or_else(|| StoreError::NotFound {
                store: self.name.clone(),
                key: format!("{key:?}"),
            })
    }

    // === Scans ===

    /// Walk every value in store order under the transaction
    pub fn scan<F>(&self, txn: &mut Transaction, mut visitor: F) -> Result<()>
    where
        F: FnMut(&V),
    {
        let partition = self.partition()?;
        let mut cursor = txn
            .cursor(&partition, LockMode::Default)
            .map_err(|e| self.engine_err("cursor", e))?;
        while let Some((_, raw_value)) = cursor.next(txn).map_err(|e| self.engine_err("scan", e))? {
            visitor(&self.deserialize_value(&raw_value)?);
        }
        Ok(())
    }

    /// Walk every committed value without a transaction, under relaxed
    /// isolation. For monitoring and debugging; never mutates.
    pub fn scan_uncommitted<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&V),
    {
        let partition = self.partition()?;
        let mut cursor = partition.read_cursor();
        while let Some((_, raw_value)) = cursor.next().map_err(|e| self.engine_err("scan", e))? {
            visitor(&self.deserialize_value(&raw_value)?);
        }
        Ok(())
    }

    /// Walk `(key, value)` pairs in store order until the visitor returns
    /// `false`. Non-transactional committed read.
    pub fn search<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let partition = self.partition()?;
        let mut cursor = partition.read_cursor();
        while let Some((raw_key, raw_value)) =
            cursor.next().map_err(|e| self.engine_err("search", e))?
        {
            let key = self.deserialize_key(&raw_key)?;
            let value = self.deserialize_value(&raw_value)?;
            if !visitor(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    /// Walk every record, letting the worker update, delete, or keep each
    /// one at the cursor position.
    ///
    /// Committing the transaction belongs to the caller, typically a
    /// [`WorkUnit`] wrapping the whole scan (see [`Store::run_job`]).
    pub fn scan_mutate<F>(&self, txn: &mut Transaction, mut worker: F) -> Result<()>
    where
        F: FnMut(&V) -> Result<ScanDecision<V>>,
    {
        let partition = self.partition()?;
        let mut cursor = txn
            .cursor(&partition, LockMode::Default)
            .map_err(|e| self.engine_err("cursor", e))?;
        while let Some((_, raw_value)) = cursor.next(txn).map_err(|e| self.engine_err("scan", e))? {
            let value = self.deserialize_value(&raw_value)?;
            match worker(&value)? {
                ScanDecision::Update(new_value) => {
                    let raw = self.serialize_value(&new_value)?;
                    cursor
                        .put_current(txn, &raw)
                        .map_err(|e| self.engine_err("update", e))?;
                }
                ScanDecision::Delete => {
                    cursor
                        .delete_current(txn)
                        .map_err(|e| self.engine_err("delete", e))?;
                }
                ScanDecision::Keep => {}
            }
        }
        Ok(())
    }

    /// Run a scan/mutate pass inside its own [`WorkUnit`]
    pub fn run_job<F>(self: &Arc<Self>, worker: F) -> Result<()>
    where
        F: FnMut(&V) -> Result<ScanDecision<V>> + Send + 'static,
    {
        let store = Arc::clone(self);
        let worker = Mutex::new(worker);
        WorkUnit::new(
            &self.env,
            format!("{}-scan-job", self.name),
            move |txn| {
                let mut worker = worker.lock();
                store.scan_mutate(txn, &mut *worker)
            },
        )
        .run()
    }

    /// Empty the store and all of its indexes, leaving them open and
    /// usable
    pub fn clear(&self) -> Result<()> {
        debug!(store = %self.name, "clearing store");
        let engine = self.env.engine()?;
        for index in self.secondaries.read().iter() {
            index.close()?;
        }
        if let Some(partition) = self.partition.write().take() {
            partition.close().map_err(|e| self.engine_err("close", e))?;
        }
        engine
            .truncate(&self.name)
            .map_err(|e| self.engine_err("truncate", e))?;
        self.open_with(&engine)
    }

    // === Joins ===

    /// Seed a join over this store with one `(index, probe)` criterion
    pub fn join_with<SK>(
        &self,
        index: &SecondaryIndex<SK, V>,
        probe: &SK,
    ) -> Result<JoinFormula<V>>
    where
        SK: Send + Sync + 'static,
    {
        JoinFormula::new(
            self.name.clone(),
            self.partition()?,
            self.value_serializer.clone(),
        )
        .join_with(index, probe)
    }

    // === Prepared puts ===

    /// Serialize a record once, up front, for repeated or retried writes
    pub fn pre_put(self: &Arc<Self>, key: &K, value: &V) -> Result<PreparedPut<K, V>> {
        Ok(PreparedPut {
            raw_key: self.serialize_key(key)?,
            raw_value: self.serialize_value(value)?,
            store: Arc::clone(self),
        })
    }

    // === Internals ===

    pub(crate) fn partition(&self) -> Result<Partition> {
        self.partition.read().clone().ok_or_else(|| {
            StoreError::Config(format!(
                "store '{}' is not initialized; call Environment::load() first",
                self.name
            ))
        })
    }

    pub(crate) fn environment(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn value_serializer_handle(&self) -> Arc<dyn Serializer<V>> {
        self.value_serializer.clone()
    }

    pub(crate) fn attach_index(&self, index: Arc<dyn SecondaryAttachment>) {
        self.secondaries.write().push(index);
    }

    pub(crate) fn engine_err(
        &self,
        operation: &str,
        source: burrow_engine::EngineError,
    ) -> StoreError {
        StoreError::engine(format!("{}.{}", self.name, operation), source)
    }

    fn serialize_key(&self, key: &K) -> Result<Vec<u8>> {
        self.key_serializer
            .serialize(key)
            .map_err(|e| StoreError::Serialize {
                store: self.name.clone(),
                source: e,
            })
    }

    fn deserialize_key(&self, bytes: &[u8]) -> Result<K> {
        self.key_serializer
            .deserialize(bytes)
            .map_err(|e| StoreError::Serialize {
                store: self.name.clone(),
                source: e,
            })
    }

    fn serialize_value(&self, value: &V) -> Result<Vec<u8>> {
        self.value_serializer
            .serialize(value)
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

    fn open_with(&self, engine: &Engine) -> Result<()> {
        let config = PartitionConfig {
            sorted_duplicates: self.sorted_duplicates.load(Ordering::Acquire),
        };
        let partition = engine
            .open_partition(&self.name, config)
            .map_err(|e| self.engine_err("open", e))?;
        for index in self.secondaries.read().iter() {
            index.init(engine, &partition)?;
        }
        *self.partition.write() = Some(partition);
        Ok(())
    }
}

impl<K> Store<K, Vec<u8>>
where
    K: fmt::Debug + Send + Sync + 'static,
{
    /// Convenience constructor for a raw-bytes value store
    pub fn binary(
        env: &Environment,
        name: impl Into<String>,
        key_serializer: Arc<dyn Serializer<K>>,
    ) -> Arc<Self> {
        Store::new(env, name, key_serializer, Arc::new(BytesSerializer))
    }
}

impl<K, V> StoreRegistration for Store<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn index_names(&self) -> Vec<String> {
        self.secondaries
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn init(&self, engine: &Engine) -> Result<()> {
        debug!(store = %self.name, "opening store");
        self.open_with(engine)
    }

    fn close_all(&self) -> Vec<StoreError> {
        let mut errors = Vec::new();
        for index in self.secondaries.read().iter() {
            if let Err(e) = index.close() {
                errors.push(e);
            }
        }
        if let Some(partition) = self.partition.write().take() {
            if let Err(e) = partition.close() {
                errors.push(self.engine_err("close", e));
            }
        }
        errors
    }
}

/// A record serialized once, ready to be written under different
/// transactional envelopes.
pub struct PreparedPut<K, V> {
    store: Arc<Store<K, V>>,
    raw_key: Vec<u8>,
    raw_value: Vec<u8>,
}

impl<K, V> PreparedPut<K, V>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Stage the write in a caller-owned transaction
    pub fn put(&self, txn: &mut Transaction) -> Result<()> {
        let partition = self.store.partition()?;
        txn.put(&partition, &self.raw_key, &self.raw_value)
            .map_err(|e| self.store.engine_err("put", e))
    }

    /// Stage the write unless the key exists
    pub fn put_no_overwrite(&self, txn: &mut Transaction) -> Result<PutOutcome> {
        let partition = self.store.partition()?;
        let written = txn
            .put_no_overwrite(&partition, &self.raw_key, &self.raw_value)
            .map_err(|e| self.store.engine_err("put_no_overwrite", e))?;
        Ok(if written {
            PutOutcome::Written
        } else {
            PutOutcome::KeyExists
        })
    }

    /// Write in an autocommit transaction, retrying lock conflicts up to
    /// the default attempt budget
    pub fn put_retry(&self) -> Result<()> {
        self.put_retry_with(DEFAULT_RETRY_ATTEMPTS)
    }

    /// Write in an autocommit transaction, retrying lock conflicts up to
    /// `attempts` times. Non-conflict failures are immediately fatal.
    pub fn put_retry_with(&self, attempts: usize) -> Result<()> {
        let mut last_conflict: Option<StoreError> = None;
        for attempt in 1..=attempts {
            let mut txn = self.store.env.begin()?;
            match self.put(&mut txn) {
                Ok(()) => match txn.commit() {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_lock_conflict() => {
                        warn!(store = %self.store.name, attempt, "put conflicted, will retry");
                        last_conflict = Some(self.store.engine_err("commit", e));
                    }
                    Err(e) => return Err(self.store.engine_err("commit", e)),
                },
                Err(e) if e.is_lock_conflict() => {
                    warn!(store = %self.store.name, attempt, "put conflicted, will retry");
                    if let Err(abort_err) = txn.abort() {
                        warn!(store = %self.store.name, %abort_err, "failed to abort after conflict");
                    }
                    last_conflict = Some(e);
                }
                Err(e) => {
                    if let Err(abort_err) = txn.abort() {
                        warn!(store = %self.store.name, %abort_err, "failed to abort after failure");
                    }
                    return Err(e);
                }
            }
        }
        Err(StoreError::RetriesExhausted {
            attempts,
            source: last_conflict.map(Box::new),
        })
    }

    /// Lift the prepared write into a [`WorkUnit`]
    pub fn into_work_unit(self) -> WorkUnit {
        let env = self.store.env.clone();
        let name = format!("{}-prepared-put", self.store.name);
        WorkUnit::new(&env, name, move |txn| self.put(txn))
    }
}
