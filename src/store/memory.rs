//! In-memory record store
//!
//! Tenants are hashed onto a fixed set of shards; each shard owns the
//! partitions of its tenants. A partition is a `BTreeMap` ordered by
//! student id, which gives scans a stable order and lets a cursor resume
//! with a range query instead of re-walking the partition.
//!
//! A store built `with_change_log` appends the delta of every local create
//! and delete to that log before the shard lock is released, so the log
//! holds each key's mutations in the order the store applied them.
//! Replicated applies are never logged.

use super::{
    ApplyOutcome, PutOutcome, RecordStore, RemoveOutcome, ScanPage, StoreError, StoreFuture,
};
use crate::io::{ProductionRng, Rng};
use crate::pagination::ScanCursor;
use crate::record::{Attributes, Record, RecordKey, RegionId, StudentId, TenantId};
use crate::replication::{resolve, ReplicationDelta, ReplicationLog, Winner};
use parking_lot::RwLock;
use std::collections::btree_map::Entry;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::Arc;

const NUM_SHARDS: usize = 16;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

type Partition = BTreeMap<StudentId, Record>;
type Shard = HashMap<TenantId, Partition>;

fn shard_index(tenant_id: &TenantId) -> usize {
    let mut hasher = DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    (hasher.finish() as usize) % NUM_SHARDS
}

pub struct InMemoryRecordStore {
    region: RegionId,
    scan_epoch: u64,
    max_page_size: usize,
    shards: Vec<RwLock<Shard>>,
    change_log: Option<Arc<ReplicationLog>>,
}

impl InMemoryRecordStore {
    pub fn new(region: RegionId) -> Self {
        Self::with_scan_epoch(region, ProductionRng::new().next_u64())
    }

    /// Fix the scan epoch (cursors from another epoch are stale)
    pub fn with_scan_epoch(region: RegionId, scan_epoch: u64) -> Self {
        InMemoryRecordStore {
            region,
            scan_epoch,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            change_log: None,
        }
    }

    /// Log every local create and delete into `log` for cross-region gossip
    pub fn with_change_log(mut self, log: Arc<ReplicationLog>) -> Self {
        self.change_log = Some(log);
        self
    }

    pub fn change_log(&self) -> Option<&Arc<ReplicationLog>> {
        self.change_log.as_ref()
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        debug_assert!(max_page_size > 0, "Precondition: max page size must be positive");
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn scan_epoch(&self) -> u64 {
        self.scan_epoch
    }

    fn shard(&self, tenant_id: &TenantId) -> &RwLock<Shard> {
        &self.shards[shard_index(tenant_id)]
    }

    /// Number of live records held for `tenant_id`
    pub fn tenant_len(&self, tenant_id: &TenantId) -> usize {
        self.shard(tenant_id)
            .read()
            .get(tenant_id)
            .map_or(0, |partition| partition.len())
    }

    /// Copy of every live record, ordered by key. For tests and diagnostics.
    pub fn snapshot(&self) -> Vec<Record> {
        let mut all: Vec<Record> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .flat_map(|partition| partition.values().cloned())
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    fn get_direct(&self, key: &RecordKey) -> Option<Record> {
        self.shard(&key.tenant_id)
            .read()
            .get(&key.tenant_id)
            .and_then(|partition| partition.get(&key.student_id))
            .cloned()
    }

    fn put_if_absent(&self, key: &RecordKey, attributes: Attributes) -> PutOutcome {
        let mut shard = self.shard(&key.tenant_id).write();
        let partition = shard.entry(key.tenant_id.clone()).or_default();

        match partition.entry(key.student_id.clone()) {
            Entry::Occupied(_) => PutOutcome::AlreadyExists,
            Entry::Vacant(slot) => {
                let record = Record::first_version(key.clone(), attributes, self.region.clone());
                slot.insert(record.clone());
                if let Some(log) = &self.change_log {
                    log.record(ReplicationDelta::upsert(record.clone()));
                }

                // TigerStyle: Postcondition
                debug_assert_eq!(record.version, 1, "Postcondition: fresh lifecycle starts at version 1");
                PutOutcome::Created(record)
            }
        }
    }

    fn remove(&self, key: &RecordKey) -> RemoveOutcome {
        let mut shard = self.shard(&key.tenant_id).write();
        let Some(partition) = shard.get_mut(&key.tenant_id) else {
            return RemoveOutcome::NotFound;
        };
        let removed = partition.remove(&key.student_id);
        if partition.is_empty() {
            shard.remove(&key.tenant_id);
        }

        match removed {
            Some(record) => {
                if let Some(log) = &self.change_log {
                    log.record(ReplicationDelta::delete(&record, self.region.clone()));
                }
                RemoveOutcome::Deleted(record)
            }
            None => RemoveOutcome::NotFound,
        }
    }

    fn scan(
        &self,
        tenant_id: &TenantId,
        cursor: Option<&str>,
        page_size_hint: usize,
    ) -> Result<ScanPage, StoreError> {
        let after = match cursor {
            Some(token) => {
                let cursor = ScanCursor::decode(token)?;
                cursor.validate(tenant_id, self.scan_epoch)?;
                Some(cursor.after)
            }
            None => None,
        };
        let limit = page_size_hint.clamp(1, self.max_page_size);

        let shard = self.shard(tenant_id).read();
        let Some(partition) = shard.get(tenant_id) else {
            return Ok(ScanPage::default());
        };

        let lower = match &after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        // Take one extra to learn whether another page exists
        let mut items: Vec<Record> = partition
            .range::<StudentId, _>((lower, Bound::Unbounded))
            .take(limit + 1)
            .map(|(_, record)| record.clone())
            .collect();
        drop(shard);

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|last| {
                ScanCursor::new(tenant_id.clone(), last.key.student_id.clone(), self.scan_epoch)
                    .encode()
            })
        } else {
            None
        };

        // TigerStyle: Postconditions
        debug_assert!(items.len() <= limit, "Postcondition: page must not exceed limit");
        debug_assert!(
            next_cursor.is_none() || !items.is_empty(),
            "Postcondition: a continuation implies a non-empty page"
        );
        debug_assert!(
            items.iter().all(|r| &r.key.tenant_id == tenant_id),
            "Postcondition: scan never crosses tenants"
        );

        Ok(ScanPage { items, next_cursor })
    }

    fn apply(&self, delta: &ReplicationDelta) -> ApplyOutcome {
        let key = delta.key();
        let mut shard = self.shard(&key.tenant_id).write();

        match delta {
            ReplicationDelta::Upsert { record } => {
                let partition = shard.entry(key.tenant_id.clone()).or_default();
                match partition.entry(key.student_id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(record.clone());
                        ApplyOutcome::Applied
                    }
                    Entry::Occupied(mut slot) => {
                        match resolve(&slot.get().stamp(), &record.stamp()) {
                            Winner::Incoming => {
                                slot.insert(record.clone());
                                ApplyOutcome::Applied
                            }
                            Winner::Local => ApplyOutcome::Superseded,
                        }
                    }
                }
            }
            ReplicationDelta::Delete { stamp, .. } => {
                let Some(partition) = shard.get_mut(&key.tenant_id) else {
                    return ApplyOutcome::Ignored;
                };
                let outcome = match partition.get(&key.student_id) {
                    None => ApplyOutcome::Ignored,
                    Some(local) => match resolve(&local.stamp(), stamp) {
                        Winner::Incoming => {
                            partition.remove(&key.student_id);
                            ApplyOutcome::Applied
                        }
                        Winner::Local => ApplyOutcome::Superseded,
                    },
                };
                if partition.is_empty() {
                    shard.remove(&key.tenant_id);
                }
                outcome
            }
        }
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("region", &self.region)
            .field("max_page_size", &self.max_page_size)
            .field("change_log", &self.change_log.as_ref().map(|log| log.len()))
            .finish()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn region(&self) -> &RegionId {
        &self.region
    }

    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move { Ok(self.get_direct(key)) })
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a RecordKey,
        attributes: Attributes,
    ) -> StoreFuture<'a, PutOutcome> {
        Box::pin(async move { Ok(self.put_if_absent(key, attributes)) })
    }

    fn delete<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, RemoveOutcome> {
        Box::pin(async move { Ok(self.remove(key)) })
    }

    fn scan_page<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        cursor: Option<&'a str>,
        page_size_hint: usize,
    ) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move { self.scan(tenant_id, cursor, page_size_hint) })
    }

    fn apply_replicated<'a>(&'a self, delta: &'a ReplicationDelta) -> StoreFuture<'a, ApplyOutcome> {
        Box::pin(async move { Ok(self.apply(delta)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::CursorError;
    use crate::replication::WriteStamp;
    use std::collections::HashSet;

    fn key(tenant: &str, student: &str) -> RecordKey {
        RecordKey::parse(tenant, student).unwrap()
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn store() -> InMemoryRecordStore {
        InMemoryRecordStore::with_scan_epoch(RegionId::new("us-east-1"), 1)
    }

    #[tokio::test]
    async fn test_conditional_put_rejects_duplicate() {
        let store = store();
        let k = key("school1", "S001");

        let first = store.conditional_put(&k, Attributes::new()).await.unwrap();
        assert!(matches!(first, PutOutcome::Created(ref r) if r.version == 1));
        if let PutOutcome::Created(record) = first {
            assert_eq!(record.last_writer_region, RegionId::new("us-east-1"));
        }

        let second = store.conditional_put(&k, Attributes::new()).await.unwrap();
        assert_eq!(second, PutOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_delete_then_recreate_restarts_versions() {
        let store = store();
        let k = key("school1", "S001");

        store.conditional_put(&k, Attributes::new()).await.unwrap();
        assert!(matches!(store.delete(&k).await.unwrap(), RemoveOutcome::Deleted(_)));
        assert_eq!(store.delete(&k).await.unwrap(), RemoveOutcome::NotFound);
        assert_eq!(store.get(&k).await.unwrap(), None);

        match store.conditional_put(&k, Attributes::new()).await.unwrap() {
            PutOutcome::Created(record) => assert_eq!(record.version, 1),
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_partition_dropped() {
        let store = store();
        let k = key("school1", "S001");
        store.conditional_put(&k, Attributes::new()).await.unwrap();
        store.delete(&k).await.unwrap();
        assert_eq!(store.tenant_len(&tenant("school1")), 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_scan_pages_in_key_order() {
        let store = store();
        for id in ["S003", "S001", "S002", "S005", "S004"] {
            store.conditional_put(&key("school1", id), Attributes::new()).await.unwrap();
        }

        let t = tenant("school1");
        let page1 = store.scan_page(&t, None, 2).await.unwrap();
        let page2 = store.scan_page(&t, page1.next_cursor.as_deref(), 2).await.unwrap();
        let page3 = store.scan_page(&t, page2.next_cursor.as_deref(), 2).await.unwrap();

        let ids = |p: &ScanPage| -> Vec<String> {
            p.items.iter().map(|r| r.key.student_id.to_string()).collect()
        };
        assert_eq!(ids(&page1), vec!["S001", "S002"]);
        assert_eq!(ids(&page2), vec!["S003", "S004"]);
        assert_eq!(ids(&page3), vec!["S005"]);
        assert!(page3.is_last());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_empty_page() {
        let store = store();
        for i in 0..4 {
            store
                .conditional_put(&key("school1", &format!("S{}", i)), Attributes::new())
                .await
                .unwrap();
        }
        let t = tenant("school1");
        let page1 = store.scan_page(&t, None, 2).await.unwrap();
        let page2 = store.scan_page(&t, page1.next_cursor.as_deref(), 2).await.unwrap();
        assert_eq!(page2.items.len(), 2);
        assert!(page2.is_last());
    }

    #[tokio::test]
    async fn test_page_size_clamped() {
        let store = store().with_max_page_size(3);
        for i in 0..5 {
            store
                .conditional_put(&key("school1", &format!("S{}", i)), Attributes::new())
                .await
                .unwrap();
        }
        let t = tenant("school1");
        assert_eq!(store.scan_page(&t, None, 100).await.unwrap().items.len(), 3);
        assert_eq!(store.scan_page(&t, None, 0).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_is_tenant_scoped() {
        let store = store();
        store.conditional_put(&key("school1", "S001"), Attributes::new()).await.unwrap();
        store.conditional_put(&key("school2", "S001"), Attributes::new()).await.unwrap();
        store.conditional_put(&key("school2", "S002"), Attributes::new()).await.unwrap();

        let page = store.scan_page(&tenant("school1"), None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key.tenant_id, tenant("school1"));
    }

    #[tokio::test]
    async fn test_foreign_and_stale_cursors_rejected() {
        let store = store();
        for i in 0..3 {
            store
                .conditional_put(&key("school1", &format!("S{}", i)), Attributes::new())
                .await
                .unwrap();
        }
        let page = store.scan_page(&tenant("school1"), None, 1).await.unwrap();
        let cursor = page.next_cursor.unwrap();

        let foreign = store.scan_page(&tenant("school2"), Some(&cursor), 1).await;
        assert_eq!(foreign, Err(StoreError::InvalidCursor(CursorError::ForeignTenant)));

        let restarted = InMemoryRecordStore::with_scan_epoch(RegionId::new("us-east-1"), 2);
        let stale = restarted.scan_page(&tenant("school1"), Some(&cursor), 1).await;
        assert_eq!(stale, Err(StoreError::InvalidCursor(CursorError::Stale)));

        let garbage = store.scan_page(&tenant("school1"), Some("not-a-cursor"), 1).await;
        assert!(matches!(garbage, Err(StoreError::InvalidCursor(CursorError::Malformed(_)))));
    }

    #[tokio::test]
    async fn test_resume_skips_deleted_cursor_key() {
        let store = store();
        for id in ["S1", "S2", "S3", "S4"] {
            store.conditional_put(&key("school1", id), Attributes::new()).await.unwrap();
        }
        let t = tenant("school1");
        let page1 = store.scan_page(&t, None, 2).await.unwrap();
        // Cursor key removed between pages; resumption still works
        store.delete(&key("school1", "S2")).await.unwrap();
        let page2 = store.scan_page(&t, page1.next_cursor.as_deref(), 2).await.unwrap();
        let ids: Vec<_> = page2.items.iter().map(|r| r.key.student_id.to_string()).collect();
        assert_eq!(ids, vec!["S3", "S4"]);
    }

    #[tokio::test]
    async fn test_concurrent_conditional_puts_single_winner() {
        let store = std::sync::Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .conditional_put(&key("school1", "S001"), Attributes::new())
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if let PutOutcome::Created(_) = handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_apply_upsert_tie_break() {
        let store = store();
        let k = key("school1", "S001");
        store.conditional_put(&k, Attributes::new()).await.unwrap();

        // eu-west-1 < us-east-1: local keeps
        let eu = Record::first_version(k.clone(), Attributes::new(), RegionId::new("eu-west-1"));
        let outcome = store.apply_replicated(&ReplicationDelta::upsert(eu)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Superseded);

        // zz-region > us-east-1: incoming wins
        let zz = Record::first_version(k.clone(), Attributes::new(), RegionId::new("zz-region"));
        let outcome = store.apply_replicated(&ReplicationDelta::upsert(zz.clone())).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.get(&k).await.unwrap(), Some(zz.clone()));

        // Re-applying the same write is a no-op
        let outcome = store.apply_replicated(&ReplicationDelta::upsert(zz)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Superseded);
    }

    #[tokio::test]
    async fn test_apply_delete() {
        let store = store();
        let k = key("school1", "S001");

        let absent = ReplicationDelta::Delete {
            key: k.clone(),
            stamp: WriteStamp::new(2, RegionId::new("eu-west-1")),
        };
        assert_eq!(store.apply_replicated(&absent).await.unwrap(), ApplyOutcome::Ignored);

        store.conditional_put(&k, Attributes::new()).await.unwrap();

        // Version-1 delete cannot beat a version-1 local write from a greater region
        let weak = ReplicationDelta::Delete {
            key: k.clone(),
            stamp: WriteStamp::new(1, RegionId::new("eu-west-1")),
        };
        assert_eq!(store.apply_replicated(&weak).await.unwrap(), ApplyOutcome::Superseded);

        assert_eq!(store.apply_replicated(&absent).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.get(&k).await.unwrap(), None);
        assert_eq!(store.apply_replicated(&absent).await.unwrap(), ApplyOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_change_log_follows_store_order() {
        let log = Arc::new(ReplicationLog::new());
        let store = store().with_change_log(log.clone());
        let k = key("school1", "S001");

        store.conditional_put(&k, Attributes::new()).await.unwrap();
        store.conditional_put(&k, Attributes::new()).await.unwrap();
        store.delete(&k).await.unwrap();
        store.delete(&k).await.unwrap();
        store.conditional_put(&k, Attributes::new()).await.unwrap();

        let deltas = log.drain();
        let kinds: Vec<bool> = deltas.iter().map(|d| d.is_delete()).collect();
        assert_eq!(kinds, vec![false, true, false]);
        assert_eq!(deltas[1].stamp(), WriteStamp::new(2, RegionId::new("us-east-1")));
        assert_eq!(deltas[2].stamp().version, 1);
    }

    #[tokio::test]
    async fn test_replicated_applies_not_logged() {
        let log = Arc::new(ReplicationLog::new());
        let store = store().with_change_log(log.clone());
        let k = key("school1", "S001");
        let remote = Record::first_version(k.clone(), Attributes::new(), RegionId::new("zz-region"));

        store.apply_replicated(&ReplicationDelta::upsert(remote.clone())).await.unwrap();
        let delete = ReplicationDelta::delete(&remote, RegionId::new("zz-region"));
        store.apply_replicated(&delete).await.unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_ordered_across_tenants() {
        let store = store();
        for (t, s) in [("b", "2"), ("a", "9"), ("b", "1"), ("a", "1")] {
            store.conditional_put(&key(t, s), Attributes::new()).await.unwrap();
        }
        let keys: Vec<String> = store.snapshot().iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, vec!["a/1", "a/9", "b/1", "b/2"]);
        let distinct: HashSet<_> = keys.iter().collect();
        assert_eq!(distinct.len(), 4);
    }
}
