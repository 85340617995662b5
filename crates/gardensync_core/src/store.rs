//! Repository contracts and the in-memory garden.

use crate::error::StoreResult;
use crate::node::{ContentNode, Sequence, Syncable};
use crate::types::{NodeId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keyset position in a change feed ordered by `(updated_at, id)`.
///
/// A page query returns rows strictly after this position, so a caller
/// can walk an arbitrarily large change set one bounded page at a time
/// without ever re-reading a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePosition {
    /// Exclusive watermark: only rows updated strictly after this time.
    pub since: Timestamp,
    /// The `(updated_at, id)` key of the last row already consumed.
    pub after: Option<(Timestamp, NodeId)>,
}

impl ChangePosition {
    /// The start of the feed for a given watermark.
    #[must_use]
    pub fn since(since: Timestamp) -> Self {
        Self { since, after: None }
    }

    /// The position just past the given row.
    #[must_use]
    pub fn past(&self, updated_at: Timestamp, id: &NodeId) -> Self {
        Self {
            since: self.since,
            after: Some((updated_at, id.clone())),
        }
    }

    /// Returns true if a row at `(updated_at, id)` lies after this
    /// position.
    #[must_use]
    pub fn admits(&self, updated_at: Timestamp, id: &NodeId) -> bool {
        if updated_at <= self.since {
            return false;
        }
        match &self.after {
            None => true,
            Some((t, i)) => (updated_at, id) > (*t, i),
        }
    }
}

/// Read/write access to one entity table of a garden.
///
/// This is the boundary the sync engine talks through; implementations may
/// be a local database, an in-memory map, or an HTTP adapter for a remote
/// instance.
pub trait EntityStore<E: Syncable> {
    /// Returns up to `limit` non-deleted entities past `position`,
    /// ordered by `updated_at` ascending (ties broken by id) so pages
    /// are stable and partial-failure recovery is predictable.
    fn find_changed_since(
        &self,
        position: &ChangePosition,
        limit: usize,
    ) -> StoreResult<Vec<E>>;

    /// Returns the entity with the given id, deleted or not.
    fn find_by_id(&self, id: &NodeId) -> StoreResult<Option<E>>;

    /// Returns true if a non-deleted entity occupies the given id.
    fn exists(&self, id: &NodeId) -> StoreResult<bool>;

    /// Inserts the entity if absent, otherwise replaces it.
    ///
    /// The caller-supplied `created_at`/`updated_at` are preserved verbatim;
    /// the store never stamps its own time onto synced rows.
    fn upsert(&self, entity: E) -> StoreResult<()>;
}

/// A full garden repository: content nodes plus sequences.
pub trait GardenRepository:
    EntityStore<ContentNode> + EntityStore<Sequence> + Send + Sync
{
}

impl<T> GardenRepository for T where
    T: EntityStore<ContentNode> + EntityStore<Sequence> + Send + Sync
{
}

/// An in-memory garden, used in tests and as the loopback backend for
/// same-process "remote" targets.
#[derive(Debug, Default)]
pub struct MemoryGarden {
    nodes: RwLock<HashMap<NodeId, ContentNode>>,
    sequences: RwLock<HashMap<NodeId, Sequence>>,
}

impl MemoryGarden {
    /// Creates an empty garden.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content nodes, including soft-deleted ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Number of sequences, including soft-deleted ones.
    #[must_use]
    pub fn sequence_count(&self) -> usize {
        self.sequences.read().len()
    }
}

fn changed_since<E: Syncable>(
    table: &HashMap<NodeId, E>,
    position: &ChangePosition,
    limit: usize,
) -> Vec<E> {
    let mut changed: Vec<E> = table
        .values()
        .filter(|e| !e.is_deleted() && position.admits(e.updated_at(), e.id()))
        .cloned()
        .collect();
    changed.sort_by(|a, b| {
        a.updated_at()
            .cmp(&b.updated_at())
            .then_with(|| a.id().cmp(b.id()))
    });
    changed.truncate(limit);
    changed
}

impl EntityStore<ContentNode> for MemoryGarden {
    fn find_changed_since(
        &self,
        position: &ChangePosition,
        limit: usize,
    ) -> StoreResult<Vec<ContentNode>> {
        Ok(changed_since(&self.nodes.read(), position, limit))
    }

    fn find_by_id(&self, id: &NodeId) -> StoreResult<Option<ContentNode>> {
        Ok(self.nodes.read().get(id).cloned())
    }

    fn exists(&self, id: &NodeId) -> StoreResult<bool> {
        Ok(self.nodes.read().get(id).is_some_and(|n| !n.deleted))
    }

    fn upsert(&self, entity: ContentNode) -> StoreResult<()> {
        self.nodes.write().insert(entity.id.clone(), entity);
        Ok(())
    }
}

impl EntityStore<Sequence> for MemoryGarden {
    fn find_changed_since(
        &self,
        position: &ChangePosition,
        limit: usize,
    ) -> StoreResult<Vec<Sequence>> {
        Ok(changed_since(&self.sequences.read(), position, limit))
    }

    fn find_by_id(&self, id: &NodeId) -> StoreResult<Option<Sequence>> {
        Ok(self.sequences.read().get(id).cloned())
    }

    fn exists(&self, id: &NodeId) -> StoreResult<bool> {
        Ok(self.sequences.read().get(id).is_some_and(|s| !s.deleted))
    }

    fn upsert(&self, entity: Sequence) -> StoreResult<()> {
        self.sequences.write().insert(entity.id.clone(), entity);
        Ok(())
    }
}
