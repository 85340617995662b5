//! Per-target sync watermarks.

use crate::error::SyncResult;
use gardensync_core::{InstanceUrl, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One watermark row per target instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// The target this cursor scopes.
    pub target_instance: InstanceUrl,
    /// Entities with `updated_at` after this are in scope for the next pass.
    pub last_sync: Timestamp,
    /// Row creation time.
    pub created: Timestamp,
    /// Last advance time.
    pub updated: Timestamp,
}

/// Durable store of sync cursors.
pub trait CursorStore: Send + Sync {
    /// Returns the watermark for a target, or the epoch if none recorded.
    fn get(&self, target: &InstanceUrl) -> SyncResult<Timestamp>;

    /// Advances the watermark for a target.
    ///
    /// Monotonic: an advance to a value at or before the current watermark
    /// leaves it unchanged. Creates the row on first advance.
    fn advance(&self, target: &InstanceUrl, to: Timestamp, now: Timestamp) -> SyncResult<()>;
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<InstanceUrl, SyncCursor>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, target: &InstanceUrl) -> SyncResult<Timestamp> {
        Ok(self
            .cursors
            .read()
            .get(target)
            .map(|c| c.last_sync)
            .unwrap_or(Timestamp::EPOCH))
    }

    fn advance(&self, target: &InstanceUrl, to: Timestamp, now: Timestamp) -> SyncResult<()> {
        let mut cursors = self.cursors.write();
        match cursors.get_mut(target) {
            Some(cursor) => {
                if to > cursor.last_sync {
                    cursor.last_sync = to;
                    cursor.updated = now;
                }
            }
            None => {
                cursors.insert(
                    target.clone(),
                    SyncCursor {
                        target_instance: target.clone(),
                        last_sync: to,
                        created: now,
                        updated: now,
                    },
                );
            }
        }
        Ok(())
    }
}
