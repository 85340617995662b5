//! # Gardensync Engine
//!
//! Reconciliation engine for gardensync.
//!
//! This crate provides:
//! - Mapping store: durable `(target, kind, localId) -> remoteId` records
//! - Sync cursor store: per-target watermarks scoping each pass
//! - Collision resolver: identity-preserving destination-id decisions
//! - Relationship remapper: pure identifier rewrite over the pass table
//! - Conflict resolver: whole-entity last-write-wins
//! - Sync orchestrator: two-phase passes and the bidirectional state machine
//! - HTTP-backed remote repository with an in-process loopback
//!
//! ## Architecture
//!
//! A bidirectional run is two **pull-style reconciliation passes**, one per
//! direction. Each pass loads the known mappings for its target, queries the
//! source for entities changed since the target's watermark, and processes
//! them in two phases: phase one collision-resolves destination identifiers
//! for the whole changed set, phase two remaps relationships and writes
//! under last-write-wins. Content nodes are swept before sequences so
//! sequence membership sees node remaps.
//!
//! ## Key Invariants
//!
//! - Mappings are append-only; repeated syncs are idempotent
//! - Identity is preserved when the target identifier is free
//! - No two local identifiers ever resolve to one destination
//! - Ties in `updated_at` keep the version already on the target
//! - A bad entity is logged and skipped; it never aborts the pass
//! - The cursor advances to the pass *start* time, and only on success

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collision;
mod config;
mod conflict;
mod cursor;
mod engine;
mod error;
mod mapping;
mod remap;
mod remote;
mod syncer;

pub use collision::CollisionResolver;
pub use config::SyncConfig;
pub use conflict::{decide, WriteDecision};
pub use cursor::{CursorStore, MemoryCursorStore, SyncCursor};
pub use engine::{PassStats, ReconcileReport, SyncEngine, SyncReport, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use mapping::{MappingRecord, MappingStore, MemoryMappingStore};
pub use remap::remap_entity;
pub use remote::{GardenLoopback, HttpClient, LoopbackClient, LoopbackServer, RemoteGarden};
pub use syncer::{sync_entity, EntityOutcome};
