//! Per-entity sync pipeline.

use crate::collision::CollisionResolver;
use crate::conflict::{self, WriteDecision};
use crate::error::{SyncError, SyncResult};
use crate::remap::remap_entity;
use gardensync_core::{EntityStore, IdMap, Syncable};
use tracing::debug;

/// What happened to one entity during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    /// The entity was written to the target.
    Applied,
    /// The target's version was newer or tied; nothing was written.
    Skipped,
}

/// Syncs one entity toward one target: resolve the destination
/// identifier, remap relationships, then apply or skip under
/// last-write-wins.
///
/// The source entity's `created_at`/`updated_at` are written verbatim so
/// the next pass's conflict comparison reflects when the content was
/// actually edited, not when it was synced.
pub fn sync_entity<E: Syncable>(
    resolver: &CollisionResolver<'_>,
    entity: &E,
    target_repo: &dyn EntityStore<E>,
    map: &mut IdMap,
) -> SyncResult<EntityOutcome> {
    let dest = resolver.resolve::<E>(entity.id(), target_repo, map)?;
    let candidate = remap_entity(entity.clone(), map);

    let existing = target_repo.find_by_id(&dest)?;
    match conflict::decide(&candidate, existing.as_ref()) {
        WriteDecision::Apply => {
            target_repo
                .upsert(candidate)
                .map_err(|e| SyncError::upsert(dest.clone(), e.to_string()))?;
            Ok(EntityOutcome::Applied)
        }
        WriteDecision::Skip {
            existing_updated_at,
        } => {
            debug!(
                kind = %E::KIND,
                id = %dest,
                candidate = %entity.updated_at(),
                existing = %existing_updated_at,
                "target version is newer or tied, skipping"
            );
            Ok(EntityOutcome::Skipped)
        }
    }
}
