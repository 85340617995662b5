//! Content entities and the relationship-remapping seam.

use crate::types::{EntityKind, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pass-local `(kind, localId) -> remoteId` lookup table.
///
/// Accumulated while a reconciliation pass collision-resolves entities and
/// consulted when relationships are rewritten. Correspondences are scoped
/// by entity kind, matching the durable mapping key, so a node and a
/// sequence that happen to share an identifier resolve independently.
/// Always threaded explicitly through calls, never ambient state, so
/// passes toward different targets cannot contaminate each other.
#[derive(Debug, Default, Clone)]
pub struct IdMap {
    entries: HashMap<EntityKind, HashMap<NodeId, NodeId>>,
}

impl IdMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a correspondence. Later inserts for the same key win.
    pub fn insert(&mut self, kind: EntityKind, local: NodeId, remote: NodeId) {
        self.entries.entry(kind).or_default().insert(local, remote);
    }

    /// Looks up the destination id for a local id, if one is known.
    #[must_use]
    pub fn get(&self, kind: EntityKind, local: &NodeId) -> Option<&NodeId> {
        self.entries.get(&kind).and_then(|scope| scope.get(local))
    }

    /// Returns the destination id if mapped, otherwise the id unchanged.
    ///
    /// An unmapped id means the referenced entity has not been
    /// collision-checked in this pass (or needs no remap); the original
    /// reference is preserved.
    #[must_use]
    pub fn resolve<'a>(&'a self, kind: EntityKind, id: &'a NodeId) -> &'a NodeId {
        self.get(kind, id).unwrap_or(id)
    }

    /// Returns true if the map holds a correspondence for the given key.
    #[must_use]
    pub fn contains(&self, kind: EntityKind, local: &NodeId) -> bool {
        self.get(kind, local).is_some()
    }

    /// Number of correspondences recorded, across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// Returns true if no correspondences are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A directed, typed reference from one content node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node of the edge.
    pub from: NodeId,
    /// Target node of the edge.
    pub to: NodeId,
    /// Edge type, e.g. `"reference"` or `"parent"`.
    pub kind: String,
}

impl Edge {
    /// Creates a new edge.
    #[must_use]
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
        }
    }
}

/// An atomic unit of content in a garden.
///
/// Owned by the content store; the sync engine only reads and upserts
/// these through the repository contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Node identifier.
    pub id: NodeId,
    /// Owning author, an opaque account reference (never remapped).
    pub author: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time. Drives cursor scoping and last-write-wins.
    pub updated_at: Timestamp,
    /// Soft-delete marker.
    pub deleted: bool,
    /// Typed edges to other content nodes.
    pub edges: Vec<Edge>,
    /// Optional ordered-collection membership (grouped member nodes).
    pub members: Vec<NodeId>,
}

impl ContentNode {
    /// Creates a node with no relationships.
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        author: impl Into<String>,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            created_at,
            updated_at,
            deleted: false,
            edges: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Adds a typed edge from this node.
    #[must_use]
    pub fn with_edge(mut self, to: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        self.edges.push(Edge::new(self.id.clone(), to, kind));
        self
    }

    /// Sets the ordered member list.
    #[must_use]
    pub fn with_members(mut self, members: Vec<NodeId>) -> Self {
        self.members = members;
        self
    }

    /// Marks the node soft-deleted.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// A curated, ordered list of content-node references.
///
/// The secondary entity collection swept by a reconciliation pass after
/// content nodes, so its member references pick up any identifier remaps
/// from the first sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Sequence identifier.
    pub id: NodeId,
    /// Owning author.
    pub author: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-delete marker.
    pub deleted: bool,
    /// Ordered member nodes.
    pub members: Vec<NodeId>,
}

impl Sequence {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        author: impl Into<String>,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            created_at,
            updated_at,
            deleted: false,
            members: Vec::new(),
        }
    }

    /// Sets the ordered member list.
    #[must_use]
    pub fn with_members(mut self, members: Vec<NodeId>) -> Self {
        self.members = members;
        self
    }
}

/// An entity the sync engine can reconcile.
///
/// Implementations expose identity, timestamps, the soft-delete flag, and
/// the pure relationship-rewrite hook used by the remapper.
pub trait Syncable: Clone + Send + Sync {
    /// The entity kind, used as the mapping-record key component.
    const KIND: EntityKind;

    /// The entity's identifier.
    fn id(&self) -> &NodeId;

    /// Replaces the entity's identifier (with its destination id).
    fn set_id(&mut self, id: NodeId);

    /// Creation time.
    fn created_at(&self) -> Timestamp;

    /// Last modification time.
    fn updated_at(&self) -> Timestamp;

    /// Soft-delete marker.
    fn is_deleted(&self) -> bool;

    /// Rewrites every neighbor reference through the lookup table.
    ///
    /// Ids without a known correspondence are left untouched.
    fn remap_refs(&mut self, map: &IdMap);
}

impl Syncable for ContentNode {
    const KIND: EntityKind = EntityKind::ContentNode;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn remap_refs(&mut self, map: &IdMap) {
        // Edge endpoints and members reference content nodes.
        for edge in &mut self.edges {
            edge.from = map.resolve(EntityKind::ContentNode, &edge.from).clone();
            edge.to = map.resolve(EntityKind::ContentNode, &edge.to).clone();
        }
        for member in &mut self.members {
            *member = map.resolve(EntityKind::ContentNode, member).clone();
        }
    }
}

impl Syncable for Sequence {
    const KIND: EntityKind = EntityKind::Sequence;

    fn id(&self) -> &NodeId {
        &self.id
    }

    fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn remap_refs(&mut self, map: &IdMap) {
        // Sequence members reference content nodes, not other sequences.
        for member in &mut self.members {
            *member = map.resolve(EntityKind::ContentNode, member).clone();
        }
    }
}
