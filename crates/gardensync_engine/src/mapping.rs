//! Durable identifier-correspondence bookkeeping.
//!
//! A mapping record answers "what did this locally-created entity become on
//! the other side." Records are append-only: once a correspondence is
//! written it is never updated or deleted, so repeated syncs stay
//! idempotent.

use crate::error::{SyncError, SyncResult};
use gardensync_core::{EntityKind, InstanceUrl, NodeId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One identifier correspondence for one target instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Record identifier, owned by the store.
    pub id: u64,
    /// The other garden this mapping applies to.
    pub target_instance: InstanceUrl,
    /// The kind of entity mapped.
    pub entity_kind: EntityKind,
    /// Identifier on the source side.
    pub local_id: NodeId,
    /// Identifier the entity was written under on the target side.
    pub remote_id: NodeId,
    /// Bookkeeping timestamps, equal at creation.
    pub created: Timestamp,
    /// Last update time; mappings are append-only, so this stays equal
    /// to `created`.
    pub updated: Timestamp,
}

/// Durable store of mapping records.
///
/// Key invariant: at most one record exists per
/// `(target_instance, entity_kind, local_id)`, and no two records for the
/// same target and kind share a `remote_id`.
pub trait MappingStore: Send + Sync {
    /// Returns the recorded remote id for a local id, if any.
    fn lookup(
        &self,
        target: &InstanceUrl,
        kind: EntityKind,
        local_id: &NodeId,
    ) -> SyncResult<Option<NodeId>>;

    /// Records a correspondence with `created = updated = now`.
    ///
    /// Idempotent: recording the same arguments twice is a no-op.
    /// Recording a *different* remote id for an already-mapped local id
    /// is a [`SyncError::Mapping`]; the engine always consults [`lookup`]
    /// before minting, so this indicates a caller bug.
    ///
    /// [`lookup`]: MappingStore::lookup
    fn record(
        &self,
        target: &InstanceUrl,
        kind: EntityKind,
        local_id: &NodeId,
        remote_id: &NodeId,
        now: Timestamp,
    ) -> SyncResult<()>;

    /// Returns all records for a target, used to prime the pass-local
    /// lookup table.
    fn for_target(&self, target: &InstanceUrl) -> SyncResult<Vec<MappingRecord>>;
}

/// In-memory mapping store.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    records: RwLock<Vec<MappingRecord>>,
    next_id: AtomicU64,
}

impl MemoryMappingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Total number of records, across all targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl MappingStore for MemoryMappingStore {
    fn lookup(
        &self,
        target: &InstanceUrl,
        kind: EntityKind,
        local_id: &NodeId,
    ) -> SyncResult<Option<NodeId>> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| {
                r.target_instance == *target && r.entity_kind == kind && r.local_id == *local_id
            })
            .map(|r| r.remote_id.clone()))
    }

    fn record(
        &self,
        target: &InstanceUrl,
        kind: EntityKind,
        local_id: &NodeId,
        remote_id: &NodeId,
        now: Timestamp,
    ) -> SyncResult<()> {
        let mut records = self.records.write();

        // Unique on (target, kind, local_id); duplicate insert with the
        // same remote id is observed as already-recorded.
        if let Some(existing) = records.iter().find(|r| {
            r.target_instance == *target && r.entity_kind == kind && r.local_id == *local_id
        }) {
            if existing.remote_id == *remote_id {
                return Ok(());
            }
            return Err(SyncError::mapping(
                local_id.clone(),
                remote_id.clone(),
                format!("already mapped to {}", existing.remote_id),
            ));
        }

        // A remote id must never be shared by two local ids.
        if let Some(existing) = records.iter().find(|r| {
            r.target_instance == *target && r.entity_kind == kind && r.remote_id == *remote_id
        }) {
            return Err(SyncError::mapping(
                local_id.clone(),
                remote_id.clone(),
                format!("remote id already claimed by {}", existing.local_id),
            ));
        }

        records.push(MappingRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target_instance: target.clone(),
            entity_kind: kind,
            local_id: local_id.clone(),
            remote_id: remote_id.clone(),
            created: now,
            updated: now,
        });
        Ok(())
    }

    fn for_target(&self, target: &InstanceUrl) -> SyncResult<Vec<MappingRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.target_instance == *target)
            .cloned()
            .collect())
    }
}
