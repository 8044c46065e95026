//! Record Store Abstraction
//!
//! Durable, partitioned key-value storage for student records. Every
//! mutation in the engine funnels through the primitives defined here.
//!
//! Implementations:
//! - `InMemoryRecordStore`: per-tenant partitions in process memory
//! - `SimulatedRecordStore`: fault-injecting wrapper for DST
//!
//! ## Scan consistency
//!
//! `scan_page` is a weakly consistent enumeration. Records inserted after a
//! multi-page scan started may be omitted, and records relocated by internal
//! rebalancing may be seen twice. Callers that need a stable snapshot must
//! not rely on enumeration for it.

pub mod directory_dst;
mod memory;
mod simulated;

pub use memory::{InMemoryRecordStore, DEFAULT_MAX_PAGE_SIZE};
pub use simulated::{SimulatedRecordStore, SimulatedStoreStats};

use crate::pagination::CursorError;
use crate::record::{Attributes, Record, RecordKey, RegionId, TenantId};
use crate::replication::ReplicationDelta;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by every store primitive
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Storage layer temporarily unreachable. Retryable.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    /// Malformed, stale or foreign pagination token. Terminal.
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result of a conditional insert
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Created(Record),
    AlreadyExists,
}

/// Result of a keyed delete
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// Carries the record as it was just before removal
    Deleted(Record),
    NotFound,
}

/// Result of applying a replicated write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Incoming write won and is now the local state
    Applied,
    /// Local write won; incoming write discarded
    Superseded,
    /// Delete of a key that is not present locally
    Ignored,
}

/// One bounded page of an enumeration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Record>,
    /// `None` signals the end of the logical dataset
    pub next_cursor: Option<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Record store trait
///
/// `conditional_put`, `delete` and `apply_replicated` on the same key are
/// linearizable with respect to each other within one store instance.
pub trait RecordStore: Send + Sync + 'static {
    /// Region whose identifier is stamped on local writes
    fn region(&self) -> &RegionId;

    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Record>>;

    /// Insert only if no live record exists for `key`. A created record
    /// starts at version 1 stamped with the local region.
    fn conditional_put<'a>(
        &'a self,
        key: &'a RecordKey,
        attributes: Attributes,
    ) -> StoreFuture<'a, PutOutcome>;

    fn delete<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, RemoveOutcome>;

    /// Return at most one bounded page of `tenant_id`'s records, resuming
    /// after `cursor` when one is given.
    fn scan_page<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        cursor: Option<&'a str>,
        page_size_hint: usize,
    ) -> StoreFuture<'a, ScanPage>;

    /// Replication apply step: last-writer-wins merge of a remote write
    fn apply_replicated<'a>(&'a self, delta: &'a ReplicationDelta) -> StoreFuture<'a, ApplyOutcome>;
}

impl<S: RecordStore> RecordStore for Arc<S> {
    fn region(&self) -> &RegionId {
        (**self).region()
    }

    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Record>> {
        (**self).get(key)
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a RecordKey,
        attributes: Attributes,
    ) -> StoreFuture<'a, PutOutcome> {
        (**self).conditional_put(key, attributes)
    }

    fn delete<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, RemoveOutcome> {
        (**self).delete(key)
    }

    fn scan_page<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        cursor: Option<&'a str>,
        page_size_hint: usize,
    ) -> StoreFuture<'a, ScanPage> {
        (**self).scan_page(tenant_id, cursor, page_size_hint)
    }

    fn apply_replicated<'a>(&'a self, delta: &'a ReplicationDelta) -> StoreFuture<'a, ApplyOutcome> {
        (**self).apply_replicated(delta)
    }
}
