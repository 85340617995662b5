//! Relationship remapping.
//!
//! A pure transform: input entity in, output entity with its own
//! identifier rewritten to its destination and every neighbor reference
//! rewritten wherever a correspondence is known. References without a
//! known correspondence pass through untouched.

use gardensync_core::{IdMap, Syncable};

/// Rewrites an entity's identifier and relationships through the
/// pass-local lookup table.
///
/// The entity's own identifier resolves within its own kind scope;
/// neighbor references resolve within the kind they point at.
#[must_use]
pub fn remap_entity<E: Syncable>(mut entity: E, map: &IdMap) -> E {
    if let Some(dest) = map.get(E::KIND, entity.id()) {
        entity.set_id(dest.clone());
    }
    entity.remap_refs(map);
    entity
}
