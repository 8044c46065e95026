//! Replication Coordinator
//!
//! Applies writes received from peer regions to the local store under the
//! last-writer-wins policy. Remote applies bypass the write path entirely,
//! so they never land in the outbound `ReplicationLog` and are never echoed
//! back to the region they came from.

use super::delta::ReplicationDelta;
use crate::record::RegionId;
use crate::store::{ApplyOutcome, RecordStore, StoreError};
use crate::write_path::RetryPolicy;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-batch tally of apply outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: u64,
    pub superseded: u64,
    pub ignored: u64,
    /// Deltas dropped after the store stayed unavailable
    pub failed: u64,
}

impl ApplyReport {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Superseded => self.superseded += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.applied + self.superseded + self.ignored + self.failed
    }

    fn absorb(&mut self, other: &ApplyReport) {
        self.applied += other.applied;
        self.superseded += other.superseded;
        self.ignored += other.ignored;
        self.failed += other.failed;
    }
}

pub struct ReplicationCoordinator<S: RecordStore> {
    store: Arc<S>,
    retry: RetryPolicy,
    totals: Mutex<ApplyReport>,
}

impl<S: RecordStore> ReplicationCoordinator<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        ReplicationCoordinator {
            store,
            retry,
            totals: Mutex::new(ApplyReport::default()),
        }
    }

    pub fn local_region(&self) -> &RegionId {
        self.store.region()
    }

    /// Lifetime totals across every batch applied
    pub fn totals(&self) -> ApplyReport {
        *self.totals.lock()
    }

    /// Apply one remote write. Applying the same delta twice leaves the
    /// store unchanged.
    pub async fn apply_remote(&self, delta: &ReplicationDelta) -> Result<ApplyOutcome, StoreError> {
        let outcome = self
            .retry
            .run("apply_replicated", || self.store.apply_replicated(delta))
            .await?;
        debug!(
            key = %delta.key(),
            version = delta.stamp().version,
            region = %delta.stamp().region,
            delete = delta.is_delete(),
            outcome = ?outcome,
            "applied remote write"
        );
        Ok(outcome)
    }

    /// Apply a batch in order. Batches claiming to come from the local
    /// region are discarded.
    pub async fn apply_batch(&self, source: &RegionId, deltas: &[ReplicationDelta]) -> ApplyReport {
        let mut report = ApplyReport::default();
        if source == self.local_region() {
            warn!(source = %source, "discarding delta batch from own region");
            return report;
        }

        for delta in deltas {
            match self.apply_remote(delta).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    warn!(key = %delta.key(), error = %err, "dropping remote write");
                    report.failed += 1;
                }
            }
        }

        // TigerStyle: Postcondition
        debug_assert_eq!(report.total(), deltas.len() as u64, "Postcondition: every delta accounted for");

        self.totals.lock().absorb(&report);
        report
    }
}
