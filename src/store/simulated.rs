//! Fault-injecting store wrapper for deterministic simulation
//!
//! Each primitive rolls its fault site before delegating. An injected
//! failure never reaches the inner store, so a failed `conditional_put` or
//! `delete` has no side effects, which is what lets the write path retry
//! them safely.

use super::{ApplyOutcome, PutOutcome, RecordStore, RemoveOutcome, ScanPage, StoreError, StoreFuture};
use crate::buggify::faults;
use crate::io::SimulatedRng;
use crate::record::{Attributes, Record, RecordKey, RegionId, TenantId};
use crate::replication::ReplicationDelta;
use parking_lot::Mutex;
use std::sync::Arc;

/// Injected failure counts per primitive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub calls: u64,
    pub get_failures: u64,
    pub put_failures: u64,
    pub delete_failures: u64,
    pub scan_failures: u64,
    pub apply_failures: u64,
}

impl SimulatedStoreStats {
    pub fn total_failures(&self) -> u64 {
        self.get_failures
            + self.put_failures
            + self.delete_failures
            + self.scan_failures
            + self.apply_failures
    }
}

struct SimulationState {
    rng: SimulatedRng,
    stats: SimulatedStoreStats,
}

pub struct SimulatedRecordStore<S: RecordStore> {
    inner: Arc<S>,
    state: Arc<Mutex<SimulationState>>,
}

impl<S: RecordStore> Clone for SimulatedRecordStore<S> {
    fn clone(&self) -> Self {
        SimulatedRecordStore {
            inner: self.inner.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: RecordStore> SimulatedRecordStore<S> {
    pub fn new(inner: Arc<S>, seed: u64) -> Self {
        SimulatedRecordStore {
            inner,
            state: Arc::new(Mutex::new(SimulationState {
                rng: SimulatedRng::new(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Store underneath the fault layer, for checking ground truth
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats
    }

    fn inject(&self, fault_id: &'static str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        if !crate::buggify!(&mut state.rng, fault_id) {
            return Ok(());
        }

        let stats = &mut state.stats;
        match fault_id {
            faults::store::GET_UNAVAILABLE => stats.get_failures += 1,
            faults::store::PUT_UNAVAILABLE => stats.put_failures += 1,
            faults::store::DELETE_UNAVAILABLE => stats.delete_failures += 1,
            faults::store::SCAN_UNAVAILABLE => stats.scan_failures += 1,
            _ => stats.apply_failures += 1,
        }
        Err(StoreError::Unavailable(format!("injected fault: {}", fault_id)))
    }
}

impl<S: RecordStore> RecordStore for SimulatedRecordStore<S> {
    fn region(&self) -> &RegionId {
        self.inner.region()
    }

    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move {
            self.inject(faults::store::GET_UNAVAILABLE)?;
            self.inner.get(key).await
        })
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a RecordKey,
        attributes: Attributes,
    ) -> StoreFuture<'a, PutOutcome> {
        Box::pin(async move {
            self.inject(faults::store::PUT_UNAVAILABLE)?;
            self.inner.conditional_put(key, attributes).await
        })
    }

    fn delete<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, RemoveOutcome> {
        Box::pin(async move {
            self.inject(faults::store::DELETE_UNAVAILABLE)?;
            self.inner.delete(key).await
        })
    }

    fn scan_page<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        cursor: Option<&'a str>,
        page_size_hint: usize,
    ) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move {
            self.inject(faults::store::SCAN_UNAVAILABLE)?;
            self.inner.scan_page(tenant_id, cursor, page_size_hint).await
        })
    }

    fn apply_replicated<'a>(&'a self, delta: &'a ReplicationDelta) -> StoreFuture<'a, ApplyOutcome> {
        Box::pin(async move {
            self.inject(faults::store::APPLY_UNAVAILABLE)?;
            self.inner.apply_replicated(delta).await
        })
    }
}
