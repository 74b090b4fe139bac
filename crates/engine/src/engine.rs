//! Engine instance and partition handles
//!
//! The [`Engine`] owns every partition and the shared lock table.
//! Partitions are registered by name the first time they are opened and
//! survive close/reopen cycles with their data intact; `truncate` is the
//! operation that empties them.

use crate::config::{EngineConfig, LockMode, PartitionConfig, SecondaryConfig};
use crate::cursor::{JoinCursor, JoinSource, ReadCursor, SecondaryCursor};
use crate::error::{EngineError, Result};
use crate::lock::{LockTable, PartitionId, TxnId};
use crate::partition::{KeyDeriver, PrimaryCore, SecondaryCore};
use crate::txn::Transaction;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct EngineInner {
    #[allow(dead_code)]
    pub(crate) config: EngineConfig,
    primaries: RwLock<HashMap<String, Arc<PrimaryCore>>>,
    secondaries: RwLock<HashMap<String, Arc<SecondaryCore>>>,
    pub(crate) locks: LockTable,
    /// Serializes commit application so index deltas and primary writes
    /// land atomically with respect to other commits.
    pub(crate) commit_lock: Mutex<()>,
    next_txn_id: AtomicU64,
    next_partition_id: AtomicU32,
    closed: AtomicBool,
}

impl EngineInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_partition_id(&self) -> PartitionId {
        self.next_partition_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_closed() {
            Err(EngineError::EngineClosed)
        } else {
            Ok(())
        }
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.primaries.read().contains_key(name) || self.secondaries.read().contains_key(name)
    }
}

/// Handle to one engine instance.
///
/// Cloning is cheap and every clone refers to the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Open a new engine instance
    pub fn open(config: EngineConfig) -> Result<Engine> {
        debug!(cache_size = ?config.cache_size, "opening engine");
        Ok(Engine {
            inner: Arc::new(EngineInner {
                config,
                primaries: RwLock::new(HashMap::new()),
                secondaries: RwLock::new(HashMap::new()),
                locks: LockTable::new(),
                commit_lock: Mutex::new(()),
                next_txn_id: AtomicU64::new(1),
                next_partition_id: AtomicU32::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open (or reopen) a named primary partition.
    ///
    /// The configuration is fixed by the first open; reopening restores the
    /// handle with the partition's data intact.
    pub fn open_partition(&self, name: &str, config: PartitionConfig) -> Result<Partition> {
        self.inner.ensure_alive()?;
        if self.inner.secondaries.read().contains_key(name) {
            return Err(EngineError::AlreadyOpen(name.to_string()));
        }

        let mut primaries = self.inner.primaries.write();
        let core = match primaries.get(name) {
            Some(core) => {
                if core.is_open() {
                    return Err(EngineError::AlreadyOpen(name.to_string()));
                }
                core.set_open(true);
                core.clone()
            }
            None => {
                debug!(partition = name, "opening partition");
                let core = Arc::new(PrimaryCore::new(
                    name.to_string(),
                    self.inner.next_partition_id(),
                    config,
                ));
                primaries.insert(name.to_string(), core.clone());
                core
            }
        };

        Ok(Partition {
            core,
            engine: self.inner.clone(),
        })
    }

    /// Open (or reopen) a named secondary partition against a primary.
    ///
    /// The deriver maps `(primary key, value)` bytes to the record's
    /// derived keys and is re-registered on every open. Opening against a
    /// non-empty primary populates the index from the existing records; a
    /// derivation failure during population leaves the index unregistered
    /// and empty.
    pub fn open_secondary(
        &self,
        name: &str,
        primary: &Partition,
        config: SecondaryConfig,
        deriver: KeyDeriver,
    ) -> Result<SecondaryPartition> {
        self.inner.ensure_alive()?;
        if !primary.core.is_open() {
            return Err(EngineError::PartitionClosed(primary.core.name.clone()));
        }
        if self.inner.primaries.read().contains_key(name) {
            return Err(EngineError::AlreadyOpen(name.to_string()));
        }

        let mut secondaries = self.inner.secondaries.write();
        if let Some(core) = secondaries.get(name) {
            if core.is_open() {
                return Err(EngineError::AlreadyOpen(name.to_string()));
            }
            *core.deriver.write() = deriver;
            core.set_open(true);
            return Ok(SecondaryPartition { core: core.clone() });
        }

        debug!(partition = name, primary = %primary.core.name, "opening secondary partition");
        let core = Arc::new(SecondaryCore::new(
            name.to_string(),
            self.inner.next_partition_id(),
            config,
            Arc::downgrade(&primary.core),
            deriver,
        ));

        // Populate from existing records before the core becomes visible,
        // so a derivation failure has no side effects.
        let mut entries: BTreeSet<(Vec<u8>, Vec<u8>)> = BTreeSet::new();
        {
            let data = primary.core.data.read();
            for (pkey, value) in data.iter() {
                for dkey in core.derive(pkey, value)? {
                    if !config.allow_duplicates {
                        let taken = entries
                            .range((dkey.clone(), Vec::new())..)
                            .take_while(|e| e.0 == dkey)
                            .any(|(_, p)| p != pkey);
                        if taken {
                            return Err(EngineError::UniqueConstraint {
                                partition: name.to_string(),
                            });
                        }
                    }
                    entries.insert((dkey, pkey.clone()));
                }
            }
        }
        *core.entries.write() = entries;

        primary.core.secondaries.write().push(core.clone());
        secondaries.insert(name.to_string(), core.clone());
        Ok(SecondaryPartition { core })
    }

    /// Begin a transaction
    pub fn begin(&self) -> Result<Transaction> {
        self.inner.ensure_alive()?;
        Ok(Transaction::new(
            self.inner.clone(),
            self.inner.next_txn_id(),
        ))
    }

    /// Empty a partition by name.
    ///
    /// Truncating a primary also empties every secondary attached to it,
    /// since their entries derive from the removed records.
    pub fn truncate(&self, name: &str) -> Result<()> {
        self.inner.ensure_alive()?;
        if let Some(core) = self.inner.primaries.read().get(name) {
            let _guard = self.inner.commit_lock.lock();
            core.data.write().clear();
            for sec in core.secondaries.read().iter() {
                sec.entries.write().clear();
            }
            return Ok(());
        }
        if let Some(core) = self.inner.secondaries.read().get(name) {
            core.entries.write().clear();
            return Ok(());
        }
        Err(EngineError::UnknownPartition(name.to_string()))
    }

    /// Close the engine.
    ///
    /// Every partition handle becomes unusable. In-flight transactions
    /// fail on their next operation.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(EngineError::EngineClosed);
        }
        debug!("closing engine");
        for core in self.inner.primaries.read().values() {
            core.set_open(false);
        }
        for core in self.inner.secondaries.read().values() {
            core.set_open(false);
        }
        Ok(())
    }

    /// Whether two handles refer to the same engine instance
    pub fn same_instance(a: &Engine, b: &Engine) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Handle to an open primary partition
#[derive(Clone)]
pub struct Partition {
    pub(crate) core: Arc<PrimaryCore>,
    pub(crate) engine: Arc<EngineInner>,
}

impl Partition {
    /// Partition name
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether the partition is currently open
    pub fn is_open(&self) -> bool {
        self.core.is_open() && !self.engine.is_closed()
    }

    /// Close the partition. The data stays; reopen with
    /// [`Engine::open_partition`].
    pub fn close(&self) -> Result<()> {
        if !self.core.is_open() {
            return Err(EngineError::PartitionClosed(self.core.name.clone()));
        }
        self.core.set_open(false);
        Ok(())
    }

    /// Non-transactional cursor over committed records
    pub fn read_cursor(&self) -> ReadCursor {
        ReadCursor::new(self.core.clone())
    }

    /// Build a merge join over exactly-positioned secondary cursors.
    ///
    /// Every cursor must be positioned and must index this partition.
    pub fn join(&self, cursors: &[SecondaryCursor], mode: LockMode) -> Result<JoinCursor> {
        if cursors.is_empty() {
            return Err(EngineError::InvalidJoin(
                "join requires at least one positioned cursor".to_string(),
            ));
        }
        let mut sources = Vec::with_capacity(cursors.len());
        for cursor in cursors {
            let (skey, _) = cursor
                .position()
                .ok_or(EngineError::CursorNotPositioned)?
                .clone();
            let indexed = cursor
                .secondary_core()
                .primary
                .upgrade()
                .is_some_and(|p| Arc::ptr_eq(&p, &self.core));
            if !indexed {
                return Err(EngineError::InvalidJoin(format!(
                    "cursor on '{}' does not index partition '{}'",
                    cursor.secondary_core().name,
                    self.core.name
                )));
            }
            sources.push(JoinSource::new(cursor.secondary_core().clone(), skey));
        }
        Ok(JoinCursor::new(self.core.clone(), mode, sources))
    }
}

/// Handle to an open secondary partition
#[derive(Clone)]
pub struct SecondaryPartition {
    pub(crate) core: Arc<SecondaryCore>,
}

impl SecondaryPartition {
    /// Partition name
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether the partition is currently open
    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// Close the partition. Entries stay; reopen with
    /// [`Engine::open_secondary`].
    pub fn close(&self) -> Result<()> {
        if !self.core.is_open() {
            return Err(EngineError::PartitionClosed(self.core.name.clone()));
        }
        self.core.set_open(false);
        Ok(())
    }

    /// Open an ordered cursor over this index
    pub fn cursor(&self, mode: LockMode) -> SecondaryCursor {
        SecondaryCursor::new(self.core.clone(), mode)
    }
}
