//! Multi-tenant, multi-region student record directory.
//!
//! Records live in a `RecordStore` keyed by (tenant, student). Writes enter
//! through the `WritePathController`, reads and enumeration through the
//! `DirectoryService`, and regions reconcile via the `ReplicationCoordinator`
//! using last-writer-wins on (version, region).

pub mod buggify;
pub mod config;
pub mod io;
pub mod observability;
pub mod pagination;
pub mod production;
pub mod record;
pub mod replication;
pub mod service;
pub mod store;
pub mod write_path;

#[cfg(test)]
mod stateright;

pub use config::{ConfigError, DirectoryConfig};
pub use pagination::{CursorError, RecordPager, ScanCursor};
pub use production::{DirectoryServer, GossipManager};
pub use record::{Attributes, Record, RecordKey, RegionId, StudentId, TenantId, ValidationError};
pub use replication::{ReplicationCoordinator, ReplicationDelta, WriteStamp};
pub use service::{DirectoryService, Operation, Request, Response};
pub use store::{InMemoryRecordStore, RecordStore, ScanPage, SimulatedRecordStore, StoreError};
pub use write_path::{CreateOutcome, DeleteOutcome, RejectReason, WritePathController};
