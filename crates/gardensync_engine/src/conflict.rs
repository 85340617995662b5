//! Whole-entity last-write-wins conflict resolution.
//!
//! No field-level merge: the version with the strictly later `updated_at`
//! wins, and a tie keeps whatever the target already holds. A concurrent
//! edit that does not bump `updated_at` is invisible to this rule and
//! will be overwritten by the next sync from the other side; operators
//! should be made aware of that tradeoff.

use gardensync_core::{Syncable, Timestamp};

/// The outcome of comparing a candidate write against the target's
/// current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// Insert or overwrite: nothing is there, or the candidate is
    /// strictly newer.
    Apply,
    /// Leave the target untouched: its version is newer or tied.
    Skip {
        /// Modification time of the version being kept.
        existing_updated_at: Timestamp,
    },
}

impl WriteDecision {
    /// Returns true if the candidate should be written.
    #[must_use]
    pub fn is_apply(&self) -> bool {
        matches!(self, WriteDecision::Apply)
    }
}

/// Decides whether a remapped candidate should be written over the
/// target's current version at the same destination identifier.
#[must_use]
pub fn decide<E: Syncable>(candidate: &E, existing: Option<&E>) -> WriteDecision {
    match existing {
        None => WriteDecision::Apply,
        Some(current) if candidate.updated_at() > current.updated_at() => WriteDecision::Apply,
        Some(current) => WriteDecision::Skip {
            existing_updated_at: current.updated_at(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gardensync_core::{ContentNode, Timestamp};

    fn node(id: &str, updated: u64) -> ContentNode {
        ContentNode::new(id, "author-1", Timestamp::from_millis(1), Timestamp::from_millis(updated))
    }

    #[test]
    fn absent_target_applies() {
        assert!(decide(&node("n1", 100), None).is_apply());
    }

    #[test]
    fn strictly_newer_applies() {
        let existing = node("n1", 100);
        assert!(decide(&node("n1", 101), Some(&existing)).is_apply());
    }

    #[test]
    fn older_skips() {
        let existing = node("n1", 100);
        assert_eq!(
            decide(&node("n1", 99), Some(&existing)),
            WriteDecision::Skip {
                existing_updated_at: Timestamp::from_millis(100)
            }
        );
    }

    #[test]
    fn tie_keeps_existing() {
        let existing = node("n1", 100);
        assert!(!decide(&node("n1", 100), Some(&existing)).is_apply());
    }

    #[test]
    fn soft_deleted_existing_still_counts() {
        // A deleted row still occupies the id; LWW applies to it the same.
        let existing = node("n1", 100).deleted();
        assert!(decide(&node("n1", 150), Some(&existing)).is_apply());
        assert!(!decide(&node("n1", 50), Some(&existing)).is_apply());
    }
}
