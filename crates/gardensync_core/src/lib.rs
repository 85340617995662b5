//! # Gardensync Core
//!
//! Domain model and repository contracts for gardensync.
//!
//! This crate provides:
//! - Identifier, timestamp, and instance-address newtypes
//! - Content entities ([`ContentNode`], [`Sequence`]) and their typed edges
//! - The [`Syncable`] trait the sync engine reconciles over
//! - The [`EntityStore`]/[`GardenRepository`] content-store contracts
//! - Clock and ID-minting seams with deterministic test doubles
//!
//! The sync engine itself lives in `gardensync_engine`; everything here is
//! the data it consumes and the collaborators it talks through.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod node;
mod store;
mod types;

pub use clock::{Clock, IdMinter, ManualClock, SequenceMinter, SystemClock, UuidMinter};
pub use error::{StoreError, StoreResult};
pub use node::{ContentNode, Edge, IdMap, Sequence, Syncable};
pub use store::{ChangePosition, EntityStore, GardenRepository, MemoryGarden};
pub use types::{EntityKind, InstanceUrl, NodeId, Timestamp};
