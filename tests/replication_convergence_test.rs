//! Cross-region last-writer-wins convergence
//!
//! Regions write locally, then exchange deltas directly through their
//! coordinators in different orders, with duplicates.

use roster::replication::{ApplyReport, ReplicationLog};
use roster::store::{
    ApplyOutcome, InMemoryRecordStore, PutOutcome, RemoveOutcome, ScanPage, StoreFuture,
};
use roster::write_path::{RecordValidator, RetryPolicy};
use roster::{
    Attributes, CreateOutcome, DeleteOutcome, Record, RecordKey, RecordStore, RegionId,
    ReplicationCoordinator, ReplicationDelta, TenantId, WritePathController,
};
use std::sync::Arc;
use tokio::sync::Notify;

struct Region {
    id: RegionId,
    store: Arc<InMemoryRecordStore>,
    writer: WritePathController<InMemoryRecordStore>,
    coordinator: ReplicationCoordinator<InMemoryRecordStore>,
    outbox: Arc<ReplicationLog>,
}

fn region(name: &str) -> Region {
    let id = RegionId::new(name);
    let outbox = Arc::new(ReplicationLog::new());
    let store = Arc::new(InMemoryRecordStore::new(id.clone()).with_change_log(outbox.clone()));
    Region {
        writer: WritePathController::new(store.clone(), RecordValidator::default(), RetryPolicy::no_retry()),
        coordinator: ReplicationCoordinator::new(store.clone(), RetryPolicy::no_retry()),
        id,
        store,
        outbox,
    }
}

fn named(name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("name", name);
    attrs
}

/// Deliver every region's outbox to every other region, in the given order
async fn exchange(regions: &[Region], order: &[usize]) {
    let outboxes: Vec<Vec<ReplicationDelta>> = regions.iter().map(|r| r.outbox.drain()).collect();
    for &to in order {
        for (from, deltas) in outboxes.iter().enumerate() {
            if from != to {
                regions[to].coordinator.apply_batch(&regions[from].id, deltas).await;
            }
        }
    }
}

#[tokio::test]
async fn test_concurrent_creates_converge_on_greatest_region() {
    for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
        let regions = vec![region("eu-west-1"), region("us-east-1"), region("ap-south-1")];
        for r in &regions {
            let outcome = r
                .writer
                .create_record("school1", "S001", named(&format!("from {}", r.id)))
                .await;
            assert!(matches!(outcome, CreateOutcome::Created(_)));
        }

        exchange(&regions, &order).await;

        let key = RecordKey::parse("school1", "S001").unwrap();
        for r in &regions {
            let record = r.store.get(&key).await.unwrap().unwrap();
            assert_eq!(record.last_writer_region, RegionId::new("us-east-1"));
            assert_eq!(record.attributes.get("name").unwrap(), "from us-east-1");
        }
        assert_eq!(regions[0].store.snapshot(), regions[2].store.snapshot());
    }
}

#[tokio::test]
async fn test_redelivery_is_a_no_op() {
    let regions = vec![region("eu-west-1"), region("us-east-1")];
    regions[0].writer.create_record("school1", "S001", named("Ada")).await;
    let deltas = regions[0].outbox.drain();

    let first = regions[1].coordinator.apply_batch(&regions[0].id, &deltas).await;
    let second = regions[1].coordinator.apply_batch(&regions[0].id, &deltas).await;
    assert_eq!(first.applied, 1);
    assert_eq!(second, ApplyReport { superseded: 1, ..Default::default() });
    assert_eq!(regions[1].store.snapshot().len(), 1);
}

#[tokio::test]
async fn test_replicated_delete_removes_everywhere() {
    let regions = vec![region("eu-west-1"), region("us-east-1")];
    regions[0].writer.create_record("school1", "S001", named("Ada")).await;
    exchange(&regions, &[0, 1]).await;
    assert_eq!(regions[1].store.snapshot().len(), 1);

    regions[1].writer.delete_record("school1", "S001").await;
    exchange(&regions, &[0, 1]).await;

    assert!(regions[0].store.snapshot().is_empty());
    assert!(regions[1].store.snapshot().is_empty());

    // Delete of an already absent key is ignored, not an error
    let stale = ReplicationDelta::delete(
        &roster::Record::first_version(
            RecordKey::parse("school1", "S001").unwrap(),
            named("Ada"),
            RegionId::new("eu-west-1"),
        ),
        RegionId::new("us-east-1"),
    );
    let report = regions[0].coordinator.apply_batch(&regions[1].id, &[stale]).await;
    assert_eq!(report.ignored, 1);
}

#[tokio::test]
async fn test_remote_applies_are_not_echoed() {
    let regions = vec![region("eu-west-1"), region("us-east-1")];
    regions[0].writer.create_record("school1", "S001", named("Ada")).await;
    exchange(&regions, &[1]).await;
    assert!(regions[1].outbox.is_empty());
}

#[tokio::test]
async fn test_own_region_batch_discarded() {
    let r = region("eu-west-1");
    r.writer.create_record("school1", "S001", named("Ada")).await;
    let deltas = r.outbox.drain();
    let report = r.coordinator.apply_batch(&r.id, &deltas).await;
    assert_eq!(report.total(), 0);
}

/// Passes every call through, but `conditional_put` only returns once
/// `release` is notified
struct StalledPutStore {
    inner: Arc<InMemoryRecordStore>,
    release: Arc<Notify>,
}

impl RecordStore for StalledPutStore {
    fn region(&self) -> &RegionId {
        self.inner.region()
    }

    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Record>> {
        self.inner.get(key)
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a RecordKey,
        attributes: Attributes,
    ) -> StoreFuture<'a, PutOutcome> {
        Box::pin(async move {
            let outcome = self.inner.conditional_put(key, attributes).await;
            self.release.notified().await;
            outcome
        })
    }

    fn delete<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, RemoveOutcome> {
        self.inner.delete(key)
    }

    fn scan_page<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        cursor: Option<&'a str>,
        page_size_hint: usize,
    ) -> StoreFuture<'a, ScanPage> {
        self.inner.scan_page(tenant_id, cursor, page_size_hint)
    }

    fn apply_replicated<'a>(&'a self, delta: &'a ReplicationDelta) -> StoreFuture<'a, ApplyOutcome> {
        self.inner.apply_replicated(delta)
    }
}

#[tokio::test]
async fn test_delete_racing_slow_create_replicates_in_store_order() {
    let east = region("us-east-1");
    let west = region("us-west-2");
    let release = Arc::new(Notify::new());
    let stalled = Arc::new(StalledPutStore {
        inner: east.store.clone(),
        release: release.clone(),
    });
    let writer = WritePathController::new(stalled, RecordValidator::default(), RetryPolicy::no_retry());
    let key = RecordKey::parse("school1", "S001").unwrap();

    // The create lands in the store but its caller is still waiting when
    // the delete runs
    let create = writer.create_record("school1", "S001", named("Ada"));
    let delete = async {
        while east.store.get(&key).await.unwrap().is_none() {
            tokio::task::yield_now().await;
        }
        let outcome = writer.delete_record("school1", "S001").await;
        release.notify_one();
        outcome
    };
    let (created, deleted) = tokio::join!(create, delete);
    assert!(matches!(created, CreateOutcome::Created(_)));
    assert!(matches!(deleted, DeleteOutcome::Deleted(_)));

    let deltas = east.outbox.drain();
    let kinds: Vec<bool> = deltas.iter().map(|d| d.is_delete()).collect();
    assert_eq!(kinds, vec![false, true]);

    west.coordinator.apply_batch(&east.id, &deltas).await;
    assert!(east.store.snapshot().is_empty());
    assert!(west.store.snapshot().is_empty());
}
