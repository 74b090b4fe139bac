//! Multi-index intersection joins
//!
//! A [`JoinFormula`] collects `(index, probe value)` criteria against one
//! primary store. `create` positions a cursor on each index at its probe
//! key: any miss means the intersection is empty and yields `None` — a
//! normal result, not an error — with every already-opened cursor
//! released. When every criterion positions, the engine's merge cursor
//! walks the intersection by synchronized advancement, never
//! materializing an index.

use crate::error::{Result, StoreError};
use crate::secondary::SecondaryIndex;
use burrow_core::Serializer;
use burrow_engine::{
    JoinCursor, LockMode, Partition, SecondaryCursor, SecondaryPartition, Transaction,
};
use std::sync::Arc;

pub(crate) struct JoinCriterion {
    index_name: String,
    partition: SecondaryPartition,
    probe: Vec<u8>,
}

/// A declarative set of `(index, probe value)` pairs over one store.
///
/// Build with [`Store::join_with`](crate::Store::join_with), chain further
/// criteria, then [`create`](JoinFormula::create).
pub struct JoinFormula<V> {
    store_name: String,
    partition: Partition,
    value_serializer: Arc<dyn Serializer<V>>,
    criteria: Vec<JoinCriterion>,
}

impl<V> JoinFormula<V>
where
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        store_name: String,
        partition: Partition,
        value_serializer: Arc<dyn Serializer<V>>,
    ) -> Self {
        Self {
            store_name,
            partition,
            value_serializer,
            criteria: Vec::new(),
        }
    }

    /// Add a criterion: records must carry `probe` as a derived key in
    /// `index`
    pub fn join_with<SK>(mut self, index: &SecondaryIndex<SK, V>, probe: &SK) -> Result<Self>
    where
        SK: Send + Sync + 'static,
    {
        self.criteria.push(JoinCriterion {
            index_name: index.name().to_string(),
            partition: index.partition()?,
            probe: index.serialize_key(probe)?,
        });
        Ok(self)
    }

    /// Position every criterion's cursor and build the join.
    ///
    /// Returns `Ok(None)` when any probe has no exact match (the join is
    /// empty); a formula with zero criteria is a caller error.
    pub fn create(&self, txn: &mut Transaction, mode: LockMode) -> Result<Option<Join<V>>> {
        if self.criteria.is_empty() {
            return Err(StoreError::Config(format!(
                "join on store '{}' requires at least one criterion",
                self.store_name
            )));
        }
        let mut cursors = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let mut cursor = criterion.partition.cursor(mode);
            let positioned = cursor.seek(txn, &criterion.probe).map_err(|e| {
                StoreError::engine(format!("{}.seek", criterion.index_name), e)
            })?;
            if positioned.is_none() {
                // No join; the cursors opened so far drop here.
                return Ok(None);
            }
            cursors.push(cursor);
        }
        let merge = self
            .partition
            .join(&cursors, mode)
            .map_err(|e| StoreError::engine(format!("{}.join", self.store_name), e))?;
        Ok(Some(Join {
            store_name: self.store_name.clone(),
            merge,
            cursors,
            value_serializer: self.value_serializer.clone(),
        }))
    }
}

/// A positioned join, ready to scan.
///
/// Scanning consumes the join, so every participating cursor is released
/// on the success path and on any error alike.
pub struct Join<V> {
    store_name: String,
    merge: JoinCursor,
    // Held so the per-index cursors live exactly as long as the merge.
    #[allow(dead_code)]
    cursors: Vec<SecondaryCursor>,
    value_serializer: Arc<dyn Serializer<V>>,
}

impl<V> Join<V>
where
    V: Send + Sync + 'static,
{
    /// Walk every record in the intersection until the visitor returns
    /// `false`
    pub fn scan<F>(mut self, txn: &mut Transaction, mut visitor: F) -> Result<()>
    where
        F: FnMut(&V) -> bool,
    {
        while let Some((_pkey, raw_value)) = self
            .merge
            .next(txn)
            .map_err(|e| StoreError::engine(format!("{}.join", self.store_name), e))?
        {
            let value = self
                .value_serializer
                .deserialize(&raw_value)
                .map_err(|e| StoreError::Serialize {
                    store: self.store_name.clone(),
                    source: e,
                })?;
            if !visitor(&value) {
                break;
            }
        }
        Ok(())
    }
}
