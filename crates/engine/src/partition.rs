//! Partition storage
//!
//! A primary partition is an ordered map from key bytes to value bytes. A
//! secondary partition is an ordered set of `(derived key, primary key)`
//! entries kept in lockstep with its primary by the commit path, using the
//! [`KeyDeriver`] registered at open.

use crate::config::{PartitionConfig, SecondaryConfig};
use crate::lock::PartitionId;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Derives zero or more secondary key byte strings from a primary record.
///
/// The callback receives `(primary key bytes, value bytes)` and must be
/// pure: the same record always yields the same key set. An empty set
/// excludes the record from the index. Errors abort the encompassing
/// mutation with the index untouched.
pub type KeyDeriver = Arc<
    dyn Fn(&[u8], &[u8]) -> std::result::Result<SmallVec<[Vec<u8>; 4]>, String> + Send + Sync,
>;

pub(crate) struct PrimaryCore {
    pub(crate) name: String,
    pub(crate) id: PartitionId,
    #[allow(dead_code)]
    pub(crate) config: PartitionConfig,
    pub(crate) data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    pub(crate) secondaries: RwLock<Vec<Arc<SecondaryCore>>>,
    pub(crate) open: AtomicBool,
}

impl PrimaryCore {
    pub(crate) fn new(name: String, id: PartitionId, config: PartitionConfig) -> Self {
        Self {
            name,
            id,
            config,
            data: RwLock::new(BTreeMap::new()),
            secondaries: RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

pub(crate) struct SecondaryCore {
    pub(crate) name: String,
    #[allow(dead_code)]
    pub(crate) id: PartitionId,
    pub(crate) config: SecondaryConfig,
    /// Back-reference for primary value lookups; ownership runs the other
    /// way (the primary holds its secondaries).
    pub(crate) primary: Weak<PrimaryCore>,
    pub(crate) entries: RwLock<BTreeSet<(Vec<u8>, Vec<u8>)>>,
    pub(crate) deriver: RwLock<KeyDeriver>,
    pub(crate) open: AtomicBool,
}

impl SecondaryCore {
    pub(crate) fn new(
        name: String,
        id: PartitionId,
        config: SecondaryConfig,
        primary: Weak<PrimaryCore>,
        deriver: KeyDeriver,
    ) -> Self {
        Self {
            name,
            id,
            config,
            primary,
            entries: RwLock::new(BTreeSet::new()),
            deriver: RwLock::new(deriver),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub(crate) fn derive(
        &self,
        pkey: &[u8],
        value: &[u8],
    ) -> crate::Result<SmallVec<[Vec<u8>; 4]>> {
        let deriver = self.deriver.read().clone();
        deriver(pkey, value).map_err(|message| crate::EngineError::Derivation {
            partition: self.name.clone(),
            message,
        })
    }
}

/// Lexicographic successor of a byte key: the smallest key strictly greater
/// than `key`.
pub(crate) fn successor(key: &[u8]) -> Vec<u8> {
    let mut s = Vec::with_capacity(key.len() + 1);
    s.extend_from_slice(key);
    s.push(0);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_is_strictly_greater_and_tight() {
        let k = b"abc".to_vec();
        let s = successor(&k);
        assert!(s > k);
        // Nothing fits between a key and its successor
        assert_eq!(s, b"abc\0".to_vec());
    }
}
