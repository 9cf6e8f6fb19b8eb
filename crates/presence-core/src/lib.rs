//! presence-core: presence tracking from recognized-face snapshots.
//!
//! Diffs successive sets of recognized identities into entry/exit events
//! and persists them as per-day time records through the storage traits.
//! Face detection, recognition and capture stay outside this crate.

pub mod engine;
pub mod memory;
pub mod partition;
pub mod session;
pub mod store;
pub mod types;

pub use engine::PresenceDiffEngine;
pub use memory::MemoryStore;
pub use partition::PartitionId;
pub use session::{PresenceSession, SessionError, SessionSummary};
pub use store::{DailyRecordStore, IdentityStore, StoreError, StoreResult};
pub use types::{Anomaly, AnomalyKind, BoundingBox, Detection, Identity, Label, PresenceDelta, Snapshot, TimeRecord};
