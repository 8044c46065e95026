//! Cross-region replication
//!
//! Each region accepts writes locally and ships them to its peers as
//! `ReplicationDelta`s. Conflicts on the same key resolve by
//! last-writer-wins over `WriteStamp` (version, then region). No tombstones
//! are kept: a delete that reaches a region before the create it removes
//! is ignored there, so batches from one source are applied in the order
//! the source produced them.

pub mod config;
pub mod convergence_dst;
pub mod coordinator;
pub mod delta;
pub mod gossip;
pub mod inbound;
pub mod lattice;
pub mod log;

pub use config::ReplicationConfig;
pub use coordinator::{ApplyReport, ReplicationCoordinator};
pub use delta::ReplicationDelta;
pub use gossip::{GossipError, GossipMessage};
pub use inbound::InboundSequencer;
pub use lattice::{resolve, LwwSlot, Winner, WriteStamp};
pub use log::ReplicationLog;
