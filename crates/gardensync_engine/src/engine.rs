//! Reconciliation orchestration and the bidirectional state machine.

use crate::collision::CollisionResolver;
use crate::config::SyncConfig;
use crate::cursor::CursorStore;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappingStore;
use crate::syncer::{self, EntityOutcome};
use gardensync_core::{
    ChangePosition, Clock, ContentNode, EntityStore, GardenRepository, IdMap, IdMinter,
    InstanceUrl, NodeId, Sequence, SystemClock, Syncable, Timestamp, UuidMinter,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// The current state of a bidirectional sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync in flight.
    Idle,
    /// Reconciling the local instance toward the target.
    SyncingAToB,
    /// Reconciling the target instance back toward the local one.
    SyncingBToA,
    /// The last run failed; safe to retry thanks to idempotent
    /// mapping/upsert semantics.
    Failed,
}

impl SyncState {
    /// Returns true if a leg is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::SyncingAToB | SyncState::SyncingBToA)
    }

    /// Returns true if a new bidirectional run may start.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed)
    }
}

/// Counters for one sweep of one entity table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Entities written to the target.
    pub applied: u64,
    /// Entities left alone because the target's version won.
    pub skipped: u64,
    /// Entities abandoned after an entity-scoped failure.
    pub errored: u64,
}

impl PassStats {
    /// Total entities considered.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.applied + self.skipped + self.errored
    }
}

/// Outcome of one reconciliation pass toward one target.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// The target the pass ran toward.
    pub target: InstanceUrl,
    /// The watermark the cursor was advanced to (captured at pass start).
    pub cursor: Timestamp,
    /// Counters for the content-node sweep.
    pub nodes: PassStats,
    /// Counters for the sequence sweep.
    pub sequences: PassStats,
}

/// Outcome of a full bidirectional run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// The local-to-target leg.
    pub a_to_b: ReconcileReport,
    /// The target-to-local leg.
    pub b_to_a: ReconcileReport,
}

/// Cumulative statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Bidirectional runs completed successfully.
    pub runs_completed: u64,
    /// Individual reconciliation passes completed.
    pub passes_completed: u64,
    /// Entities applied across all passes.
    pub entities_applied: u64,
    /// Entities skipped across all passes.
    pub entities_skipped: u64,
    /// Entities errored across all passes.
    pub entities_errored: u64,
    /// Message of the last failure, if any.
    pub last_error: Option<String>,
}

/// The sync engine reconciles content between two garden instances.
///
/// A single engine serves one instance pair; its mapping and cursor
/// stores are keyed by target address, so the two legs of a
/// bidirectional run keep separate bookkeeping. Concurrent runs against
/// the same engine are rejected via the state machine, since passes
/// toward the same target must be serialized. Separate engines for
/// separate targets are fully independent.
pub struct SyncEngine<M: MappingStore, C: CursorStore> {
    config: SyncConfig,
    mappings: Arc<M>,
    cursors: Arc<C>,
    minter: Arc<dyn IdMinter>,
    clock: Arc<dyn Clock>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<M: MappingStore, C: CursorStore> SyncEngine<M, C> {
    /// Creates an engine with the system clock and UUID minting.
    pub fn new(config: SyncConfig, mappings: M, cursors: C) -> Self {
        Self {
            config,
            mappings: Arc::new(mappings),
            cursors: Arc::new(cursors),
            minter: Arc::new(UuidMinter),
            clock: Arc::new(SystemClock),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the clock (deterministic tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the identifier minter (deterministic tests).
    #[must_use]
    pub fn with_minter(mut self, minter: Arc<dyn IdMinter>) -> Self {
        self.minter = minter;
        self
    }

    /// The mapping store backing this engine.
    pub fn mappings(&self) -> &M {
        &self.mappings
    }

    /// The cursor store backing this engine.
    pub fn cursors(&self) -> &C {
        &self.cursors
    }

    /// Current state of the bidirectional state machine.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Claims the engine for a new run, or fails if one is in flight.
    ///
    /// Check and transition happen under one write lock, so of two
    /// concurrent callers exactly one wins; the other gets
    /// [`SyncError::InvalidStateTransition`].
    fn begin_run(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", SyncState::SyncingAToB),
            });
        }
        *state = SyncState::SyncingAToB;
        Ok(())
    }

    /// Runs one reconciliation pass from `source` toward `target`.
    ///
    /// Sweeps content nodes first, then sequences, sharing one pass-local
    /// lookup table so sequence membership picks up node remaps. The
    /// cursor is advanced to the time captured at pass start (not the
    /// end), so entities updated mid-pass are revisited next time.
    pub fn reconcile<S, T>(
        &self,
        source: &S,
        source_url: &InstanceUrl,
        target: &T,
        target_url: &InstanceUrl,
    ) -> SyncResult<ReconcileReport>
    where
        S: GardenRepository,
        T: GardenRepository,
    {
        let pass_started = self.clock.now();
        let since = self.cursors.get(target_url)?;

        let mut map = IdMap::new();
        for record in self.mappings.for_target(target_url)? {
            map.insert(record.entity_kind, record.local_id, record.remote_id);
        }
        info!(
            target = %target_url,
            since = %since,
            known_mappings = map.len(),
            "reconciliation pass started"
        );

        let nodes = self
            .sweep::<ContentNode, _, _>(source, source_url, target, target_url, since, &mut map)?;
        let sequences =
            self.sweep::<Sequence, _, _>(source, source_url, target, target_url, since, &mut map)?;

        self.cursors.advance(target_url, pass_started, self.clock.now())?;

        info!(
            target = %target_url,
            applied = nodes.applied + sequences.applied,
            skipped = nodes.skipped + sequences.skipped,
            errored = nodes.errored + sequences.errored,
            cursor = %pass_started,
            "reconciliation pass complete"
        );

        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.entities_applied += nodes.applied + sequences.applied;
        stats.entities_skipped += nodes.skipped + sequences.skipped;
        stats.entities_errored += nodes.errored + sequences.errored;
        drop(stats);

        Ok(ReconcileReport {
            target: target_url.clone(),
            cursor: pass_started,
            nodes,
            sequences,
        })
    }

    /// Sweeps one entity table in two phases, so forward references
    /// inside the changed set are remapped even when the referenced
    /// entity is processed later.
    ///
    /// Each phase walks the source's change feed one `page_size` page at
    /// a time, keeping at most one page of entities in memory. Phase one
    /// resolves destination identifiers for every changed entity; phase
    /// two walks the feed again, remapping and writing.
    fn sweep<E, S, T>(
        &self,
        source: &S,
        source_url: &InstanceUrl,
        target: &T,
        target_url: &InstanceUrl,
        since: Timestamp,
        map: &mut IdMap,
    ) -> SyncResult<PassStats>
    where
        E: Syncable,
        S: EntityStore<E>,
        T: EntityStore<E>,
    {
        let mut stats = PassStats::default();
        let resolver = CollisionResolver::new(
            self.mappings.as_ref(),
            self.minter.as_ref(),
            target_url,
            self.clock.now(),
        )
        .with_origin(source_url);

        // Phase 1: resolve destination identifiers for the whole changed
        // set before writing anything.
        let mut unresolved: HashSet<NodeId> = HashSet::new();
        let mut position = ChangePosition::since(since);
        loop {
            let page = source.find_changed_since(&position, self.config.page_size)?;
            let Some(last) = page.last() else { break };
            position = position.past(last.updated_at(), last.id());

            for entity in &page {
                if let Err(e) = resolver.resolve::<E>(entity.id(), target, map) {
                    warn!(
                        kind = %E::KIND,
                        id = %entity.id(),
                        error = %e,
                        "failed to resolve destination id, skipping entity"
                    );
                    unresolved.insert(entity.id().clone());
                    stats.errored += 1;
                }
            }
            if page.len() < self.config.page_size {
                break;
            }
        }

        // Phase 2: remap and write. A failure here abandons the entity,
        // not the pass; it is picked up again the next time the entity
        // changes.
        let mut position = ChangePosition::since(since);
        loop {
            let page = source.find_changed_since(&position, self.config.page_size)?;
            let Some(last) = page.last() else { break };
            position = position.past(last.updated_at(), last.id());

            for entity in &page {
                if unresolved.contains(entity.id()) {
                    continue;
                }
                match syncer::sync_entity(&resolver, entity, target, map) {
                    Ok(EntityOutcome::Applied) => stats.applied += 1,
                    Ok(EntityOutcome::Skipped) => stats.skipped += 1,
                    Err(e) => {
                        warn!(
                            kind = %E::KIND,
                            id = %entity.id(),
                            error = %e,
                            "entity sync failed, continuing pass"
                        );
                        stats.errored += 1;
                    }
                }
            }
            if page.len() < self.config.page_size {
                break;
            }
        }

        Ok(stats)
    }

    /// Runs both legs: local toward target, then target toward local.
    ///
    /// If the first leg fails the second never runs, and the whole
    /// operation is reported failed; already-committed writes from the
    /// failed run are safe to leave because re-running is idempotent.
    pub fn sync_bidirectional<L, T>(&self, local: &L, target: &T) -> SyncResult<SyncReport>
    where
        L: GardenRepository,
        T: GardenRepository,
    {
        self.begin_run()?;
        let a_to_b = match self.reconcile(
            local,
            &self.config.local_url,
            target,
            &self.config.target_url,
        ) {
            Ok(report) => report,
            Err(e) => {
                return Err(self.fail_leg(
                    self.config.local_url.clone(),
                    self.config.target_url.clone(),
                    e,
                ))
            }
        };

        self.set_state(SyncState::SyncingBToA);
        let b_to_a = match self.reconcile(
            target,
            &self.config.target_url,
            local,
            &self.config.local_url,
        ) {
            Ok(report) => report,
            Err(e) => {
                return Err(self.fail_leg(
                    self.config.target_url.clone(),
                    self.config.local_url.clone(),
                    e,
                ))
            }
        };

        self.set_state(SyncState::Idle);
        let mut stats = self.stats.write();
        stats.runs_completed += 1;
        stats.last_error = None;
        drop(stats);

        Ok(SyncReport { a_to_b, b_to_a })
    }

    fn fail_leg(&self, source: InstanceUrl, target: InstanceUrl, cause: SyncError) -> SyncError {
        self.set_state(SyncState::Failed);
        let error = SyncError::Leg {
            source,
            target,
            cause: Box::new(cause),
        };
        self.stats.write().last_error = Some(error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::mapping::MemoryMappingStore;
    use gardensync_core::{ManualClock, MemoryGarden, SequenceMinter, StoreError, StoreResult};

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn node(id: &str, updated: u64) -> ContentNode {
        ContentNode::new(id, "author-1", ts(1), ts(updated))
    }

    fn source_url() -> InstanceUrl {
        InstanceUrl::new("https://a.example.com")
    }

    fn engine(clock: Arc<ManualClock>) -> SyncEngine<MemoryMappingStore, MemoryCursorStore> {
        SyncEngine::new(
            SyncConfig::new("https://a.example.com", "https://b.example.com"),
            MemoryMappingStore::new(),
            MemoryCursorStore::new(),
        )
        .with_clock(clock)
        .with_minter(Arc::new(SequenceMinter::new("fresh")))
    }

    #[test]
    fn state_machine_checks() {
        assert!(SyncState::Idle.can_start());
        assert!(SyncState::Failed.can_start());
        assert!(!SyncState::SyncingAToB.can_start());
        assert!(!SyncState::SyncingBToA.can_start());

        assert!(SyncState::SyncingAToB.is_active());
        assert!(SyncState::SyncingBToA.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Failed.is_active());
    }

    #[test]
    fn only_one_caller_claims_the_engine() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(clock);

        // The check and the transition happen under one lock, so a
        // second claim always observes the first.
        engine.begin_run().unwrap();
        assert_eq!(engine.state(), SyncState::SyncingAToB);
        let err = engine.begin_run().unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn run_rejected_while_active() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(clock);
        engine.set_state(SyncState::SyncingAToB);

        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let err = engine.sync_bidirectional(&a, &b).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn empty_pass_still_advances_cursor() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let target = InstanceUrl::new("https://b.example.com");

        let report = engine.reconcile(&a, &source_url(), &b, &target).unwrap();
        assert_eq!(report.cursor, ts(1000));
        assert_eq!(report.nodes, PassStats::default());
        assert_eq!(engine.cursors.get(&target).unwrap(), ts(1000));
    }

    #[test]
    fn forward_reference_is_remapped() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let target = InstanceUrl::new("https://b.example.com");

        // "early" references "late"; "late" is processed second (higher
        // updated_at) and collides on the target.
        a.upsert(node("early", 100).with_edge("late", "reference"))
            .unwrap();
        a.upsert(node("late", 200)).unwrap();
        b.upsert(node("late", 10)).unwrap();

        engine.reconcile(&a, &source_url(), &b, &target).unwrap();

        let written: ContentNode = b.find_by_id(&NodeId::new("early")).unwrap().unwrap();
        assert_eq!(written.edges[0].to, NodeId::new("fresh-1"));
    }

    #[test]
    fn sequences_pick_up_node_remaps() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let target = InstanceUrl::new("https://b.example.com");

        a.upsert(node("n1", 100)).unwrap();
        b.upsert(node("n1", 10)).unwrap();
        a.upsert(
            Sequence::new("s1", "author-1", ts(1), ts(150))
                .with_members(vec![NodeId::new("n1"), NodeId::new("outside")]),
        )
        .unwrap();

        engine.reconcile(&a, &source_url(), &b, &target).unwrap();

        let seq: Sequence = b.find_by_id(&NodeId::new("s1")).unwrap().unwrap();
        // The collided node reference follows the mint; the reference to
        // an entity outside the changed set is left as-is.
        assert_eq!(
            seq.members,
            vec![NodeId::new("fresh-1"), NodeId::new("outside")]
        );
    }

    #[test]
    fn pass_stats_count_outcomes() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let target = InstanceUrl::new("https://b.example.com");

        a.upsert(node("applies", 100)).unwrap();
        a.upsert(node("loses", 100)).unwrap();
        b.upsert(node("loses", 500)).unwrap();
        // Pin "loses" to the occupied id so it hits the conflict check
        // instead of colliding to a fresh one.
        engine
            .mappings
            .record(
                &target,
                gardensync_core::EntityKind::ContentNode,
                &NodeId::new("loses"),
                &NodeId::new("loses"),
                ts(5),
            )
            .unwrap();

        let report = engine.reconcile(&a, &source_url(), &b, &target).unwrap();
        assert_eq!(report.nodes.applied, 1);
        assert_eq!(report.nodes.skipped, 1);
        assert_eq!(report.nodes.errored, 0);
        assert_eq!(report.nodes.total(), 2);

        let stats = engine.stats();
        assert_eq!(stats.passes_completed, 1);
        assert_eq!(stats.entities_applied, 1);
        assert_eq!(stats.entities_skipped, 1);
    }

    /// A garden whose change feed always fails.
    #[derive(Default)]
    struct BrokenGarden;

    impl<E: Syncable> EntityStore<E> for BrokenGarden {
        fn find_changed_since(
            &self,
            _position: &ChangePosition,
            _limit: usize,
        ) -> StoreResult<Vec<E>> {
            Err(StoreError::backend("change feed unavailable"))
        }

        fn find_by_id(&self, _id: &NodeId) -> StoreResult<Option<E>> {
            Err(StoreError::backend("unavailable"))
        }

        fn exists(&self, _id: &NodeId) -> StoreResult<bool> {
            Err(StoreError::backend("unavailable"))
        }

        fn upsert(&self, _entity: E) -> StoreResult<()> {
            Err(StoreError::backend("unavailable"))
        }
    }

    /// A garden that rejects writes to one specific id.
    struct FlakyGarden {
        inner: MemoryGarden,
        poison: NodeId,
    }

    impl<E: Syncable> EntityStore<E> for FlakyGarden
    where
        MemoryGarden: EntityStore<E>,
    {
        fn find_changed_since(
            &self,
            position: &ChangePosition,
            limit: usize,
        ) -> StoreResult<Vec<E>> {
            <MemoryGarden as EntityStore<E>>::find_changed_since(&self.inner, position, limit)
        }

        fn find_by_id(&self, id: &NodeId) -> StoreResult<Option<E>> {
            <MemoryGarden as EntityStore<E>>::find_by_id(&self.inner, id)
        }

        fn exists(&self, id: &NodeId) -> StoreResult<bool> {
            <MemoryGarden as EntityStore<E>>::exists(&self.inner, id)
        }

        fn upsert(&self, entity: E) -> StoreResult<()> {
            if entity.id() == &self.poison {
                return Err(StoreError::backend("disk full"));
            }
            <MemoryGarden as EntityStore<E>>::upsert(&self.inner, entity)
        }
    }

    #[test]
    fn bad_entity_does_not_abort_the_pass() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let a = MemoryGarden::new();
        let b = FlakyGarden {
            inner: MemoryGarden::new(),
            poison: NodeId::new("cursed"),
        };
        let target = InstanceUrl::new("https://b.example.com");

        a.upsert(node("first", 100)).unwrap();
        a.upsert(node("cursed", 150)).unwrap();
        a.upsert(node("last", 200)).unwrap();

        // The failing write is logged and counted; the pass itself
        // succeeds and the entities around it still land.
        let report = engine.reconcile(&a, &source_url(), &b, &target).unwrap();
        assert_eq!(report.nodes.applied, 2);
        assert_eq!(report.nodes.errored, 1);
        assert_eq!(report.nodes.skipped, 0);

        let first: Option<ContentNode> = b.find_by_id(&NodeId::new("first")).unwrap();
        let last: Option<ContentNode> = b.find_by_id(&NodeId::new("last")).unwrap();
        let cursed: Option<ContentNode> = b.find_by_id(&NodeId::new("cursed")).unwrap();
        assert!(first.is_some());
        assert!(last.is_some());
        assert!(cursed.is_none());

        // The pass completed, so its cursor still advanced.
        assert_eq!(engine.cursors.get(&target).unwrap(), ts(1000));
        assert_eq!(engine.stats().entities_errored, 1);
    }

    #[test]
    fn failed_pass_leaves_cursor_unchanged() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let broken = BrokenGarden;
        let b = MemoryGarden::new();
        let target = InstanceUrl::new("https://b.example.com");

        assert!(engine
            .reconcile(&broken, &source_url(), &b, &target)
            .is_err());
        assert_eq!(engine.cursors.get(&target).unwrap(), Timestamp::EPOCH);
    }

    #[test]
    fn first_leg_failure_skips_second_leg() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        let broken = BrokenGarden;
        let b = MemoryGarden::new();
        b.upsert(node("n1", 100)).unwrap();

        let err = engine.sync_bidirectional(&broken, &b).unwrap_err();
        assert!(matches!(err, SyncError::Leg { .. }));
        assert_eq!(engine.state(), SyncState::Failed);
        // Leg two never ran: nothing was pulled into the broken side's
        // cursor, and the local instance's cursor is untouched.
        let local = InstanceUrl::new("https://a.example.com");
        assert_eq!(engine.cursors.get(&local).unwrap(), Timestamp::EPOCH);
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn failed_engine_can_retry() {
        let clock = Arc::new(ManualClock::starting_at(ts(1000)));
        let engine = engine(Arc::clone(&clock));
        engine.set_state(SyncState::Failed);

        let a = MemoryGarden::new();
        let b = MemoryGarden::new();
        let report = engine.sync_bidirectional(&a, &b).unwrap();
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(report.a_to_b.nodes.total(), 0);
        assert_eq!(engine.stats().runs_completed, 1);
    }
}
