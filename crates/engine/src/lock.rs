//! Record-level lock table
//!
//! One table serves every partition. Entries are keyed by
//! `(partition id, record key)` and hold either a set of shared owners or a
//! single exclusive owner. Acquisition is fail-fast: a conflicting holder
//! produces [`EngineError::LockConflict`] instead of blocking, which keeps
//! the engine free of deadlocks and leaves retry policy to the layers
//! above.

use crate::error::{EngineError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;

pub(crate) type TxnId = u64;
pub(crate) type PartitionId = u32;
pub(crate) type LockKey = (PartitionId, Vec<u8>);

#[derive(Debug)]
enum LockEntry {
    Shared(SmallVec<[TxnId; 2]>),
    Exclusive(TxnId),
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    table: DashMap<LockKey, LockEntry>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Acquire a shared lock. Returns true when the caller newly acquired
    /// it (and must remember to release), false when it already held one.
    pub(crate) fn acquire_shared(
        &self,
        txn: TxnId,
        key: LockKey,
        partition: &str,
    ) -> Result<bool> {
        match self.table.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(LockEntry::Shared(SmallVec::from_slice(&[txn])));
                Ok(true)
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                LockEntry::Shared(owners) => {
                    if owners.contains(&txn) {
                        Ok(false)
                    } else {
                        owners.push(txn);
                        Ok(true)
                    }
                }
                LockEntry::Exclusive(owner) if *owner == txn => Ok(false),
                LockEntry::Exclusive(_) => Err(EngineError::LockConflict {
                    partition: partition.to_string(),
                }),
            },
        }
    }

    /// Acquire an exclusive lock, upgrading a shared lock held only by the
    /// caller. Returns true when newly acquired.
    pub(crate) fn acquire_exclusive(
        &self,
        txn: TxnId,
        key: LockKey,
        partition: &str,
    ) -> Result<bool> {
        match self.table.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(LockEntry::Exclusive(txn));
                Ok(true)
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                LockEntry::Shared(owners) if owners.as_slice() == [txn] => {
                    *slot.get_mut() = LockEntry::Exclusive(txn);
                    Ok(false)
                }
                LockEntry::Shared(_) => Err(EngineError::LockConflict {
                    partition: partition.to_string(),
                }),
                LockEntry::Exclusive(owner) if *owner == txn => Ok(false),
                LockEntry::Exclusive(_) => Err(EngineError::LockConflict {
                    partition: partition.to_string(),
                }),
            },
        }
    }

    /// Release every lock the transaction holds among `held`.
    pub(crate) fn release(&self, txn: TxnId, held: &[LockKey]) {
        for key in held {
            if let Entry::Occupied(mut slot) = self.table.entry(key.clone()) {
                let drop_entry = match slot.get_mut() {
                    LockEntry::Shared(owners) => {
                        owners.retain(|t| *t != txn);
                        owners.is_empty()
                    }
                    LockEntry::Exclusive(owner) => *owner == txn,
                };
                if drop_entry {
                    slot.remove();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &[u8]) -> LockKey {
        (1, k.to_vec())
    }

    #[test]
    fn test_shared_locks_coexist() {
        let table = LockTable::new();
        assert!(table.acquire_shared(1, key(b"a"), "p").unwrap());
        assert!(table.acquire_shared(2, key(b"a"), "p").unwrap());
        // Re-acquisition is a no-op
        assert!(!table.acquire_shared(1, key(b"a"), "p").unwrap());
    }

    #[test]
    fn test_exclusive_conflicts_with_other_holder() {
        let table = LockTable::new();
        table.acquire_exclusive(1, key(b"a"), "p").unwrap();
        let err = table.acquire_exclusive(2, key(b"a"), "p").unwrap_err();
        assert!(err.is_lock_conflict());
        let err = table.acquire_shared(2, key(b"a"), "p").unwrap_err();
        assert!(err.is_lock_conflict());
    }

    #[test]
    fn test_upgrade_from_sole_shared_holder() {
        let table = LockTable::new();
        table.acquire_shared(1, key(b"a"), "p").unwrap();
        assert!(!table.acquire_exclusive(1, key(b"a"), "p").unwrap());
        // Now exclusive: others conflict
        assert!(table.acquire_shared(2, key(b"a"), "p").is_err());
    }

    #[test]
    fn test_upgrade_blocked_by_other_readers() {
        let table = LockTable::new();
        table.acquire_shared(1, key(b"a"), "p").unwrap();
        table.acquire_shared(2, key(b"a"), "p").unwrap();
        assert!(table.acquire_exclusive(1, key(b"a"), "p").is_err());
    }

    #[test]
    fn test_release_frees_the_record() {
        let table = LockTable::new();
        table.acquire_exclusive(1, key(b"a"), "p").unwrap();
        table.release(1, &[key(b"a")]);
        assert!(table.acquire_exclusive(2, key(b"a"), "p").is_ok());
    }

    #[test]
    fn test_release_keeps_remaining_readers() {
        let table = LockTable::new();
        table.acquire_shared(1, key(b"a"), "p").unwrap();
        table.acquire_shared(2, key(b"a"), "p").unwrap();
        table.release(1, &[key(b"a")]);
        assert!(table.acquire_exclusive(3, key(b"a"), "p").is_err());
        table.release(2, &[key(b"a")]);
        assert!(table.acquire_exclusive(3, key(b"a"), "p").is_ok());
    }
}
