//! Ordered cursors
//!
//! Cursors do not borrow their transaction; operations that need locking
//! or the transaction's write buffer take `&mut Transaction` per call.
//! Positions are remembered as the last key returned, so iteration stays
//! correct while the underlying map changes — each step re-seeks from the
//! remembered position.
//!
//! Dropping a cursor releases it; record locks it acquired belong to the
//! transaction and are held until the transaction finishes.

use crate::config::LockMode;
use crate::error::{EngineError, Result};
use crate::partition::{successor, PrimaryCore, SecondaryCore};
use crate::txn::{Transaction, WriteOp};
use std::ops::Bound;
use std::sync::Arc;

/// Transactional forward cursor over a primary partition.
///
/// `next` merges committed records with the owning transaction's buffered
/// writes, so a scan observes the transaction's own mutations.
pub struct Cursor {
    core: Arc<PrimaryCore>,
    mode: LockMode,
    pos: Option<Vec<u8>>,
    current: Option<Vec<u8>>,
}

impl Cursor {
    pub(crate) fn new(core: Arc<PrimaryCore>, mode: LockMode) -> Self {
        Self {
            core,
            mode,
            pos: None,
            current: None,
        }
    }

    /// Advance to the next record, returning `(key, value)` or `None` when
    /// the range is exhausted.
    pub fn next(&mut self, txn: &mut Transaction) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        if !self.core.is_open() {
            return Err(EngineError::PartitionClosed(self.core.name.clone()));
        }
        loop {
            let committed = {
                let data = self.core.data.read();
                let mut range = match &self.pos {
                    Some(p) => data.range::<[u8], _>((
                        Bound::Excluded(p.as_slice()),
                        Bound::Unbounded,
                    )),
                    None => data.range::<[u8], _>(..),
                };
                range.next().map(|(k, v)| (k.clone(), v.clone()))
            };
            let buffered = txn.next_buffered_after(self.core.id, self.pos.as_deref());

            // Pick the smaller key; on a tie the buffered op overlays the
            // committed record.
            let (key, buffered_op) = match (committed, buffered) {
                (None, None) => {
                    self.current = None;
                    return Ok(None);
                }
                (Some((ck, cv)), None) => (ck, BufferedAt::Committed(cv)),
                (None, Some((bk, op))) => (bk, BufferedAt::Buffered(op)),
                (Some((ck, cv)), Some((bk, op))) => {
                    if bk <= ck {
                        (bk, BufferedAt::Buffered(op))
                    } else {
                        (ck, BufferedAt::Committed(cv))
                    }
                }
            };
            self.pos = Some(key.clone());

            match buffered_op {
                BufferedAt::Buffered(WriteOp::Put(value)) => {
                    self.current = Some(key.clone());
                    return Ok(Some((key, value)));
                }
                BufferedAt::Buffered(WriteOp::Delete) => continue,
                BufferedAt::Committed(value) => {
                    if self.mode.locks_reads() {
                        txn.lock_shared(&self.core, &key)?;
                        // Re-read under the lock; the record may have been
                        // removed by a commit that raced the seek.
                        match self.core.data.read().get(&key).cloned() {
                            Some(value) => {
                                self.current = Some(key.clone());
                                return Ok(Some((key, value)));
                            }
                            None => continue,
                        }
                    }
                    self.current = Some(key.clone());
                    return Ok(Some((key, value)));
                }
            }
        }
    }

    /// Replace the value at the cursor's current position
    pub fn put_current(&mut self, txn: &mut Transaction, value: &[u8]) -> Result<()> {
        txn.ensure_active()?;
        let key = self
            .current
            .clone()
            .ok_or(EngineError::CursorNotPositioned)?;
        txn.lock_exclusive(&self.core, &key)?;
        txn.buffer_write(&self.core, key, WriteOp::Put(value.to_vec()));
        Ok(())
    }

    /// Delete the record at the cursor's current position
    pub fn delete_current(&mut self, txn: &mut Transaction) -> Result<()> {
        txn.ensure_active()?;
        let key = self
            .current
            .clone()
            .ok_or(EngineError::CursorNotPositioned)?;
        txn.lock_exclusive(&self.core, &key)?;
        txn.buffer_write(&self.core, key, WriteOp::Delete);
        Ok(())
    }
}

enum BufferedAt {
    Buffered(WriteOp),
    Committed(Vec<u8>),
}

/// Non-transactional forward cursor over committed records.
///
/// Takes no locks and never observes buffered writes; intended for
/// relaxed-isolation inspection.
pub struct ReadCursor {
    core: Arc<PrimaryCore>,
    pos: Option<Vec<u8>>,
}

impl ReadCursor {
    pub(crate) fn new(core: Arc<PrimaryCore>) -> Self {
        Self { core, pos: None }
    }

    /// Advance to the next committed record
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.core.is_open() {
            return Err(EngineError::PartitionClosed(self.core.name.clone()));
        }
        let data = self.core.data.read();
        let mut range = match &self.pos {
            Some(p) => data.range::<[u8], _>((Bound::Excluded(p.as_slice()), Bound::Unbounded)),
            None => data.range::<[u8], _>(..),
        };
        match range.next() {
            Some((k, v)) => {
                let entry = (k.clone(), v.clone());
                drop(range);
                drop(data);
                self.pos = Some(entry.0.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// Ordered cursor over a secondary index.
///
/// Entries are `(derived key, primary key)` pairs ordered
/// lexicographically; the cursor yields `(derived key, primary value)`.
/// Values are read from committed primary state.
pub struct SecondaryCursor {
    core: Arc<SecondaryCore>,
    mode: LockMode,
    pos: Option<(Vec<u8>, Vec<u8>)>,
}

impl SecondaryCursor {
    pub(crate) fn new(core: Arc<SecondaryCore>, mode: LockMode) -> Self {
        Self {
            core,
            mode,
            pos: None,
        }
    }

    pub(crate) fn secondary_core(&self) -> &Arc<SecondaryCore> {
        &self.core
    }

    pub(crate) fn position(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.pos.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.core.is_open() {
            Ok(())
        } else {
            Err(EngineError::PartitionClosed(self.core.name.clone()))
        }
    }

    fn fetch_value(&self, txn: &mut Transaction, pkey: &[u8]) -> Result<Option<Vec<u8>>> {
        let primary = self.core.primary.upgrade().ok_or(EngineError::EngineClosed)?;
        if self.mode.locks_reads() {
            txn.lock_shared(&primary, pkey)?;
        }
        let value = primary.data.read().get(pkey).cloned();
        Ok(value)
    }

    /// Position on the first entry whose derived key equals `skey`.
    ///
    /// Returns `(derived key, primary value)` on a hit, `None` when no
    /// record carries the key (the cursor is then unpositioned).
    pub fn seek(
        &mut self,
        txn: &mut Transaction,
        skey: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        self.ensure_open()?;
        let entry = {
            let entries = self.core.entries.read();
            entries
                .range((skey.to_vec(), Vec::new())..)
                .next()
                .filter(|(k, _)| k == skey)
                .cloned()
        };
        let Some(entry) = entry else {
            self.pos = None;
            return Ok(None);
        };
        let value = self.fetch_value(txn, &entry.1)?;
        self.pos = Some(entry.clone());
        Ok(value.map(|v| (entry.0, v)))
    }

    /// Position on the first entry whose derived key is at or after `skey`
    /// in index order. Also serves raw-prefix positioning, since a prefix
    /// is its own inclusive lower bound.
    pub fn seek_range(
        &mut self,
        txn: &mut Transaction,
        skey: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        self.ensure_open()?;
        let entry = {
            let entries = self.core.entries.read();
            entries.range((skey.to_vec(), Vec::new())..).next().cloned()
        };
        let Some(entry) = entry else {
            self.pos = None;
            return Ok(None);
        };
        let value = self.fetch_value(txn, &entry.1)?;
        self.pos = Some(entry.clone());
        Ok(value.map(|v| (entry.0, v)))
    }

    /// Advance to the next entry in index order (or the first entry when
    /// unpositioned)
    pub fn next(&mut self, txn: &mut Transaction) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        self.ensure_open()?;
        loop {
            let entry = {
                let entries = self.core.entries.read();
                match &self.pos {
                    Some(p) => entries
                        .range((Bound::Excluded(p.clone()), Bound::Unbounded))
                        .next()
                        .cloned(),
                    None => entries.iter().next().cloned(),
                }
            };
            let Some(entry) = entry else {
                return Ok(None);
            };
            self.pos = Some(entry.clone());
            match self.fetch_value(txn, &entry.1)? {
                Some(value) => return Ok(Some((entry.0, value))),
                // Entry raced a primary delete; skip it.
                None => continue,
            }
        }
    }

    /// Step to the previous entry in index order (or the last entry when
    /// unpositioned)
    pub fn prev(&mut self, txn: &mut Transaction) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        self.ensure_open()?;
        loop {
            let entry = {
                let entries = self.core.entries.read();
                match &self.pos {
                    Some(p) => entries.range(..p.clone()).next_back().cloned(),
                    None => entries.iter().next_back().cloned(),
                }
            };
            let Some(entry) = entry else {
                return Ok(None);
            };
            self.pos = Some(entry.clone());
            match self.fetch_value(txn, &entry.1)? {
                Some(value) => return Ok(Some((entry.0, value))),
                None => continue,
            }
        }
    }
}

pub(crate) struct JoinSource {
    sec: Arc<SecondaryCore>,
    skey: Vec<u8>,
}

impl JoinSource {
    pub(crate) fn new(sec: Arc<SecondaryCore>, skey: Vec<u8>) -> Self {
        Self { sec, skey }
    }

    /// First primary key at or after `floor` among this source's entries
    /// for its fixed derived key.
    fn first_pkey_at_or_after(&self, floor: &[u8]) -> Option<Vec<u8>> {
        let entries = self.sec.entries.read();
        entries
            .range((self.skey.clone(), floor.to_vec())..)
            .next()
            .filter(|(k, _)| *k == self.skey)
            .map(|(_, p)| p.clone())
    }
}

/// Merge join over N positioned secondary cursors.
///
/// Each source exposes the primary keys under its probe key in sorted
/// order; the cursor advances them in lockstep and yields exactly the keys
/// present in every source, dereferenced to the primary value. No index is
/// materialized.
pub struct JoinCursor {
    primary: Arc<PrimaryCore>,
    mode: LockMode,
    sources: Vec<JoinSource>,
    last: Option<Vec<u8>>,
    done: bool,
}

impl JoinCursor {
    pub(crate) fn new(primary: Arc<PrimaryCore>, mode: LockMode, sources: Vec<JoinSource>) -> Self {
        Self {
            primary,
            mode,
            sources,
            last: None,
            done: false,
        }
    }

    /// Next `(primary key, value)` in the intersection, or `None` when any
    /// source is exhausted
    pub fn next(&mut self, txn: &mut Transaction) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        if self.done {
            return Ok(None);
        }
        loop {
            let floor = match &self.last {
                Some(k) => successor(k),
                None => Vec::new(),
            };
            let Some(mut candidate) = self.sources[0].first_pkey_at_or_after(&floor) else {
                self.done = true;
                return Ok(None);
            };

            // Raise the candidate until every source agrees on it.
            loop {
                let mut advanced = false;
                for source in &self.sources {
                    match source.first_pkey_at_or_after(&candidate) {
                        None => {
                            self.done = true;
                            return Ok(None);
                        }
                        Some(k) if k > candidate => {
                            candidate = k;
                            advanced = true;
                        }
                        Some(_) => {}
                    }
                }
                if !advanced {
                    break;
                }
            }

            self.last = Some(candidate.clone());
            if self.mode.locks_reads() {
                txn.lock_shared(&self.primary, &candidate)?;
            }
            if let Some(value) = self.primary.data.read().get(&candidate).cloned() {
                return Ok(Some((candidate, value)));
            }
            // The record vanished between index read and dereference; keep
            // scanning from the next key.
        }
    }
}
