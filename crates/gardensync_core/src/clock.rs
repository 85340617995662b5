//! Clock and identifier-minting seams.
//!
//! Both are traits so the engine can be driven deterministically in tests:
//! real deployments use [`SystemClock`] and [`UuidMinter`], tests use
//! [`ManualClock`] and [`SequenceMinter`].

use crate::types::{NodeId, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp::from_millis(millis)
    }
}

/// A settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given time.
    #[must_use]
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now.as_millis()),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_millis(), Ordering::SeqCst);
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now.load(Ordering::SeqCst))
    }
}

/// Mints globally-unique node identifiers and short display keys.
pub trait IdMinter: Send + Sync {
    /// Mints a fresh, globally-unique identifier.
    fn mint(&self) -> NodeId;

    /// Derives a short, human-readable display key for an identifier.
    fn short_key(&self, id: &NodeId) -> String;
}

/// Minter backed by random v4 UUIDs.
///
/// Identifiers are high-entropy by construction; collisions between
/// independent instances are possible but vanishingly rare, which is why
/// the sync engine checks rather than assumes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidMinter;

impl IdMinter for UuidMinter {
    fn mint(&self) -> NodeId {
        NodeId::new(uuid::Uuid::new_v4().simple().to_string())
    }

    fn short_key(&self, id: &NodeId) -> String {
        id.as_str().chars().take(8).collect()
    }
}

/// A deterministic minter for tests: `prefix-1`, `prefix-2`, ...
#[derive(Debug)]
pub struct SequenceMinter {
    prefix: String,
    next: AtomicU64,
}

impl SequenceMinter {
    /// Creates a minter producing ids with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdMinter for SequenceMinter {
    fn mint(&self) -> NodeId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        NodeId::new(format!("{}-{}", self.prefix, n))
    }

    fn short_key(&self, id: &NodeId) -> String {
        id.as_str().to_string()
    }
}
