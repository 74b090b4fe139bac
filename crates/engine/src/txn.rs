//! Transactions
//!
//! Writes are buffered per partition in key order and applied at commit
//! under the engine's commit lock. Reads see the transaction's own buffered
//! writes first (read-your-writes), then committed data. Record locks are
//! taken as operations touch records and released when the transaction
//! finishes, commit or abort alike.
//!
//! Commit runs in two passes: the first derives every secondary-index
//! delta (so a derivation failure aborts with nothing applied), the second
//! applies primary writes and index maintenance together.

use crate::config::LockMode;
use crate::cursor::Cursor;
use crate::engine::{EngineInner, Partition, SecondaryPartition};
use crate::error::{EngineError, Result};
use crate::lock::{LockKey, PartitionId, TxnId};
use crate::partition::{PrimaryCore, SecondaryCore};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Put(Vec<u8>),
    Delete,
}

/// An open transaction against one engine instance.
///
/// Owned by exactly one logical attempt; dropping an active transaction
/// aborts it.
pub struct Transaction {
    engine: Arc<EngineInner>,
    id: TxnId,
    active: bool,
    writes: FxHashMap<PartitionId, BTreeMap<Vec<u8>, WriteOp>>,
    touched: FxHashMap<PartitionId, Arc<PrimaryCore>>,
    locks: Vec<LockKey>,
}

struct IndexDelta {
    sec: Arc<SecondaryCore>,
    removes: BTreeSet<(Vec<u8>, Vec<u8>)>,
    adds: BTreeSet<(Vec<u8>, Vec<u8>)>,
}

impl Transaction {
    pub(crate) fn new(engine: Arc<EngineInner>, id: TxnId) -> Self {
        Self {
            engine,
            id,
            active: true,
            writes: FxHashMap::default(),
            touched: FxHashMap::default(),
            locks: Vec::new(),
        }
    }

    /// Transaction id, unique within the engine instance
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the transaction can still accept operations
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::TransactionClosed)
        }
    }

    fn ensure_usable(&self, core: &PrimaryCore) -> Result<()> {
        self.ensure_active()?;
        if self.engine.is_closed() {
            return Err(EngineError::EngineClosed);
        }
        if !core.is_open() {
            return Err(EngineError::PartitionClosed(core.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn lock_shared(&mut self, core: &PrimaryCore, key: &[u8]) -> Result<()> {
        let lock_key = (core.id, key.to_vec());
        if self
            .engine
            .locks
            .acquire_shared(self.id, lock_key.clone(), &core.name)?
        {
            self.locks.push(lock_key);
        }
        Ok(())
    }

    pub(crate) fn lock_exclusive(&mut self, core: &PrimaryCore, key: &[u8]) -> Result<()> {
        let lock_key = (core.id, key.to_vec());
        if self
            .engine
            .locks
            .acquire_exclusive(self.id, lock_key.clone(), &core.name)?
        {
            self.locks.push(lock_key);
        }
        Ok(())
    }

    pub(crate) fn buffer_write(&mut self, core: &Arc<PrimaryCore>, key: Vec<u8>, op: WriteOp) {
        self.touched.entry(core.id).or_insert_with(|| core.clone());
        self.writes.entry(core.id).or_default().insert(key, op);
    }

    pub(crate) fn write_op(&self, partition: PartitionId, key: &[u8]) -> Option<WriteOp> {
        self.writes.get(&partition)?.get(key).cloned()
    }

    /// First buffered key strictly after `pos` (or the first buffered key
    /// when `pos` is `None`) in the given partition.
    pub(crate) fn next_buffered_after(
        &self,
        partition: PartitionId,
        pos: Option<&[u8]>,
    ) -> Option<(Vec<u8>, WriteOp)> {
        let ops = self.writes.get(&partition)?;
        let mut range = match pos {
            Some(p) => ops.range::<[u8], _>((std::ops::Bound::Excluded(p), std::ops::Bound::Unbounded)),
            None => ops.range::<[u8], _>(..),
        };
        range.next().map(|(k, op)| (k.clone(), op.clone()))
    }

    // === Point operations ===

    /// Write a record. The write is buffered until commit.
    pub fn put(&mut self, partition: &Partition, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_usable(&partition.core)?;
        self.lock_exclusive(&partition.core, key)?;
        self.buffer_write(&partition.core, key.to_vec(), WriteOp::Put(value.to_vec()));
        Ok(())
    }

    /// Write a record only if the key is absent.
    ///
    /// Returns true when the write was buffered, false when the key
    /// already exists (committed or buffered in this transaction).
    pub fn put_no_overwrite(
        &mut self,
        partition: &Partition,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        self.ensure_usable(&partition.core)?;
        self.lock_exclusive(&partition.core, key)?;
        let exists = match self.write_op(partition.core.id, key) {
            Some(WriteOp::Put(_)) => true,
            Some(WriteOp::Delete) => false,
            None => partition.core.data.read().contains_key(key),
        };
        if exists {
            return Ok(false);
        }
        self.buffer_write(&partition.core, key.to_vec(), WriteOp::Put(value.to_vec()));
        Ok(true)
    }

    /// Delete a record. Deleting an absent key is a no-op at commit.
    pub fn delete(&mut self, partition: &Partition, key: &[u8]) -> Result<()> {
        self.ensure_usable(&partition.core)?;
        self.lock_exclusive(&partition.core, key)?;
        self.buffer_write(&partition.core, key.to_vec(), WriteOp::Delete);
        Ok(())
    }

    /// Read a record under the given isolation mode, seeing this
    /// transaction's own buffered writes first.
    pub fn get(
        &mut self,
        partition: &Partition,
        key: &[u8],
        mode: LockMode,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_usable(&partition.core)?;
        match self.write_op(partition.core.id, key) {
            Some(WriteOp::Put(value)) => return Ok(Some(value)),
            Some(WriteOp::Delete) => return Ok(None),
            None => {}
        }
        if mode.locks_reads() {
            self.lock_shared(&partition.core, key)?;
        }
        Ok(partition.core.data.read().get(key).cloned())
    }

    /// Exact lookup through a secondary index: the primary value of the
    /// first record whose derived key equals `skey`.
    ///
    /// Index entries reflect committed state; a transaction's own writes
    /// become visible to index readers at commit.
    pub fn get_secondary(
        &mut self,
        secondary: &SecondaryPartition,
        skey: &[u8],
        mode: LockMode,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        if !secondary.core.is_open() {
            return Err(EngineError::PartitionClosed(secondary.core.name.clone()));
        }
        let primary = secondary
            .core
            .primary
            .upgrade()
            .ok_or(EngineError::EngineClosed)?;

        let pkey = {
            let entries = secondary.core.entries.read();
            entries
                .range((skey.to_vec(), Vec::new())..)
                .next()
                .filter(|(k, _)| k == skey)
                .map(|(_, p)| p.clone())
        };
        let Some(pkey) = pkey else {
            return Ok(None);
        };
        if mode.locks_reads() {
            self.lock_shared(&primary, &pkey)?;
        }
        let value = primary.data.read().get(&pkey).cloned();
        Ok(value)
    }

    /// Open a transactional cursor over a primary partition
    pub fn cursor(&self, partition: &Partition, mode: LockMode) -> Result<Cursor> {
        self.ensure_usable(&partition.core)?;
        Ok(Cursor::new(partition.core.clone(), mode))
    }

    // === Completion ===

    /// Commit every buffered write atomically, maintaining secondary
    /// indexes, then release all locks.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.apply();
        self.finish();
        result
    }

    /// Discard every buffered write and release all locks
    pub fn abort(mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish();
        Ok(())
    }

    fn apply(&mut self) -> Result<()> {
        if self.engine.is_closed() {
            return Err(EngineError::EngineClosed);
        }
        let _guard = self.engine.commit_lock.lock();
        let writes = std::mem::take(&mut self.writes);

        // Pass 1: derive index deltas against the committed state. Any
        // failure here returns before a single byte has changed.
        let mut deltas: Vec<IndexDelta> = Vec::new();
        for (pid, ops) in &writes {
            let Some(core) = self.touched.get(pid).cloned() else {
                continue;
            };
            if !core.is_open() {
                return Err(EngineError::PartitionClosed(core.name.clone()));
            }
            let secs: Vec<Arc<SecondaryCore>> = core
                .secondaries
                .read()
                .iter()
                .filter(|s| s.is_open())
                .cloned()
                .collect();
            if secs.is_empty() {
                continue;
            }
            let data = core.data.read();
            for (key, op) in ops {
                let old = data.get(key);
                for sec in &secs {
                    let slot = match deltas.iter().position(|d| Arc::ptr_eq(&d.sec, sec)) {
                        Some(i) => i,
                        None => {
                            deltas.push(IndexDelta {
                                sec: sec.clone(),
                                removes: BTreeSet::new(),
                                adds: BTreeSet::new(),
                            });
                            deltas.len() - 1
                        }
                    };
                    let delta = &mut deltas[slot];
                    if let Some(old_value) = old {
                        for dkey in sec.derive(key, old_value)? {
                            delta.removes.insert((dkey, key.clone()));
                        }
                    }
                    if let WriteOp::Put(new_value) = op {
                        for dkey in sec.derive(key, new_value)? {
                            delta.adds.insert((dkey, key.clone()));
                        }
                    }
                }
            }
        }

        for delta in &deltas {
            if !delta.sec.config.allow_duplicates {
                check_unique(delta)?;
            }
        }

        // Pass 2: apply primary writes and index maintenance.
        for (pid, ops) in writes {
            let Some(core) = self.touched.get(&pid).cloned() else {
                continue;
            };
            let mut data = core.data.write();
            for (key, op) in ops {
                match op {
                    WriteOp::Put(value) => {
                        data.insert(key, value);
                    }
                    WriteOp::Delete => {
                        data.remove(&key);
                    }
                }
            }
        }
        for delta in deltas {
            let mut entries = delta.sec.entries.write();
            for entry in &delta.removes {
                entries.remove(entry);
            }
            for entry in delta.adds {
                entries.insert(entry);
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.engine.locks.release(self.id, &self.locks);
        self.locks.clear();
        self.writes.clear();
        self.touched.clear();
        self.active = false;
    }
}

/// Reject an add when another record would share the derived key in a
/// unique index, counting both surviving committed entries and the other
/// adds in this commit.
fn check_unique(delta: &IndexDelta) -> Result<()> {
    let entries = delta.sec.entries.read();
    for (skey, pkey) in &delta.adds {
        let sibling_add = delta
            .adds
            .range((skey.clone(), Vec::new())..)
            .take_while(|e| e.0 == *skey)
            .any(|(_, p)| p != pkey);
        let sibling_committed = entries
            .range((skey.clone(), Vec::new())..)
            .take_while(|e| e.0 == *skey)
            .any(|entry| entry.1 != *pkey && !delta.removes.contains(entry));
        if sibling_add || sibling_committed {
            return Err(EngineError::UniqueConstraint {
                partition: delta.sec.name.clone(),
            });
        }
    }
    Ok(())
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.active {
            debug!(txn = self.id, "transaction dropped while active; aborting");
            self.finish();
        }
    }
}
