//! Destination-identifier resolution.
//!
//! Decides what identifier an entity will live under on the target:
//! the recorded mapping if one exists, the entity's own identifier if it
//! is free on the target, or a freshly minted one on collision. Identity
//! is preserved whenever possible so cross-garden references stay
//! human-debuggable; collisions are the exception, not the rule.

use crate::error::SyncResult;
use crate::mapping::MappingStore;
use gardensync_core::{EntityStore, IdMap, IdMinter, InstanceUrl, NodeId, Syncable, Timestamp};
use tracing::debug;

/// Resolves destination identifiers for one pass toward one target.
pub struct CollisionResolver<'a> {
    mappings: &'a dyn MappingStore,
    minter: &'a dyn IdMinter,
    target: &'a InstanceUrl,
    origin: Option<&'a InstanceUrl>,
    now: Timestamp,
}

impl<'a> CollisionResolver<'a> {
    /// Creates a resolver scoped to one target instance.
    pub fn new(
        mappings: &'a dyn MappingStore,
        minter: &'a dyn IdMinter,
        target: &'a InstanceUrl,
        now: Timestamp,
    ) -> Self {
        Self {
            mappings,
            minter,
            target,
            origin: None,
            now,
        }
    }

    /// Also records the inverse correspondence toward the source instance
    /// whenever a fresh decision is made.
    ///
    /// Without the inverse record, the reverse leg of a bidirectional run
    /// would see the just-written copy occupying its own identifier on
    /// the source side and mint a duplicate for it. With it, the reverse
    /// leg routes the copy back to its origin and the conflict resolver's
    /// tie rule makes it a no-op.
    #[must_use]
    pub fn with_origin(mut self, origin: &'a InstanceUrl) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Resolves the destination identifier for `local_id`, updating the
    /// pass-local lookup table.
    ///
    /// The decision order is: pass table, then the durable mapping store,
    /// then an existence probe against the target. A mapping is recorded
    /// in every path that reaches the probe, including the no-collision
    /// identity case, so future passes skip the probe entirely.
    pub fn resolve<E: Syncable>(
        &self,
        local_id: &NodeId,
        target_repo: &dyn EntityStore<E>,
        map: &mut IdMap,
    ) -> SyncResult<NodeId> {
        if let Some(remote) = map.get(E::KIND, local_id) {
            return Ok(remote.clone());
        }

        if let Some(remote) = self.mappings.lookup(self.target, E::KIND, local_id)? {
            map.insert(E::KIND, local_id.clone(), remote.clone());
            return Ok(remote);
        }

        let remote = if target_repo.exists(local_id)? {
            let minted = self.minter.mint();
            debug!(
                kind = %E::KIND,
                local = %local_id,
                remote = %minted,
                "identifier collision on target, minted fresh id"
            );
            minted
        } else {
            local_id.clone()
        };

        self.mappings
            .record(self.target, E::KIND, local_id, &remote, self.now)?;
        if let Some(origin) = self.origin {
            self.mappings
                .record(origin, E::KIND, &remote, local_id, self.now)?;
        }
        map.insert(E::KIND, local_id.clone(), remote.clone());
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MemoryMappingStore;
    use gardensync_core::{ContentNode, MemoryGarden, SequenceMinter};

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn node(id: &str, updated: u64) -> ContentNode {
        ContentNode::new(id, "author-1", ts(1), ts(updated))
    }

    struct Fixture {
        mappings: MemoryMappingStore,
        minter: SequenceMinter,
        target: InstanceUrl,
        garden: MemoryGarden,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                mappings: MemoryMappingStore::new(),
                minter: SequenceMinter::new("fresh"),
                target: InstanceUrl::new("https://b.example.com"),
                garden: MemoryGarden::new(),
            }
        }

        fn resolver(&self) -> CollisionResolver<'_> {
            CollisionResolver::new(&self.mappings, &self.minter, &self.target, ts(1000))
        }
    }

    #[test]
    fn identity_preserved_when_target_is_free() {
        let fx = Fixture::new();
        let mut map = IdMap::new();

        let remote = fx
            .resolver()
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(remote, NodeId::new("n1"));
        // Mapping recorded anyway, for idempotency.
        assert_eq!(fx.mappings.len(), 1);
        assert_eq!(
            map.get(gardensync_core::EntityKind::ContentNode, &NodeId::new("n1")),
            Some(&NodeId::new("n1"))
        );
    }

    #[test]
    fn collision_mints_fresh_id() {
        let fx = Fixture::new();
        fx.garden.upsert(node("n1", 50)).unwrap();
        let mut map = IdMap::new();

        let remote = fx
            .resolver()
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(remote, NodeId::new("fresh-1"));
        assert_eq!(
            fx.mappings
                .lookup(&fx.target, gardensync_core::EntityKind::ContentNode, &NodeId::new("n1"))
                .unwrap(),
            Some(NodeId::new("fresh-1"))
        );
    }

    #[test]
    fn recorded_mapping_wins_without_probe() {
        let fx = Fixture::new();
        fx.mappings
            .record(
                &fx.target,
                gardensync_core::EntityKind::ContentNode,
                &NodeId::new("n1"),
                &NodeId::new("r1"),
                ts(5),
            )
            .unwrap();
        // Even though the target now has an entity at "n1", the earlier
        // decision stands.
        fx.garden.upsert(node("n1", 50)).unwrap();

        let mut map = IdMap::new();
        let remote = fx
            .resolver()
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(remote, NodeId::new("r1"));
        assert_eq!(fx.mappings.len(), 1);
    }

    #[test]
    fn resolve_is_idempotent_within_a_pass() {
        let fx = Fixture::new();
        fx.garden.upsert(node("n1", 50)).unwrap();
        let mut map = IdMap::new();
        let resolver = fx.resolver();

        let first = resolver
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();
        let second = resolver
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.mappings.len(), 1);
    }

    #[test]
    fn soft_deleted_target_row_is_not_a_collision() {
        let fx = Fixture::new();
        fx.garden.upsert(node("n1", 50).deleted()).unwrap();
        let mut map = IdMap::new();

        let remote = fx
            .resolver()
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(remote, NodeId::new("n1"));
    }

    #[test]
    fn kinds_resolve_independently() {
        use gardensync_core::Sequence;

        let fx = Fixture::new();
        // The node table holds "x"; the sequence table is free.
        fx.garden.upsert(node("x", 50)).unwrap();
        let mut map = IdMap::new();
        let resolver = fx.resolver();

        let node_dest = resolver
            .resolve::<ContentNode>(&NodeId::new("x"), &fx.garden, &mut map)
            .unwrap();
        let seq_dest = resolver
            .resolve::<Sequence>(&NodeId::new("x"), &fx.garden, &mut map)
            .unwrap();

        // The node collided and was minted; the sequence keeps its
        // identity because its own table has no occupant.
        assert_eq!(node_dest, NodeId::new("fresh-1"));
        assert_eq!(seq_dest, NodeId::new("x"));
        assert_eq!(
            fx.mappings
                .lookup(&fx.target, gardensync_core::EntityKind::Sequence, &NodeId::new("x"))
                .unwrap(),
            Some(NodeId::new("x"))
        );
    }

    #[test]
    fn origin_gets_the_inverse_correspondence() {
        let fx = Fixture::new();
        fx.garden.upsert(node("n1", 50)).unwrap();
        let origin = InstanceUrl::new("https://a.example.com");
        let mut map = IdMap::new();

        let resolver = fx.resolver().with_origin(&origin);
        let remote = resolver
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();

        assert_eq!(remote, NodeId::new("fresh-1"));
        // The minted copy on the target routes back to its origin.
        assert_eq!(
            fx.mappings
                .lookup(&origin, gardensync_core::EntityKind::ContentNode, &remote)
                .unwrap(),
            Some(NodeId::new("n1"))
        );
    }

    #[test]
    fn distinct_locals_never_share_a_destination() {
        let fx = Fixture::new();
        fx.garden.upsert(node("n1", 50)).unwrap();
        fx.garden.upsert(node("n2", 50)).unwrap();
        let mut map = IdMap::new();
        let resolver = fx.resolver();

        let r1 = resolver
            .resolve::<ContentNode>(&NodeId::new("n1"), &fx.garden, &mut map)
            .unwrap();
        let r2 = resolver
            .resolve::<ContentNode>(&NodeId::new("n2"), &fx.garden, &mut map)
            .unwrap();

        assert_ne!(r1, r2);
    }
}
