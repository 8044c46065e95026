//! Deterministic Simulation Testing for the directory write and scan paths
//!
//! Drives a `WritePathController` and `RecordPager` over a
//! `SimulatedRecordStore` with injected `Unavailable` faults, while keeping
//! a shadow copy of what the store must contain.
//!
//! ```text
//! for seed in 0..100 {
//!     let mut harness = DirectoryDSTHarness::new(DirectoryDSTConfig::moderate(seed));
//!     harness.run(500).await;
//!     harness.check_final_state().await;
//!     assert!(harness.result().is_success(), "{}", harness.result().summary());
//! }
//! ```
//!
//! Invariants checked after every operation:
//! - a create succeeds iff the key was absent, and never overwrites
//! - a delete reports `Deleted` iff the key was present
//! - an operation that surfaced `StoreUnavailable` left no trace
//! - a completed enumeration returns exactly the tenant's live keys, once each

use super::{InMemoryRecordStore, RecordStore, SimulatedRecordStore};
use crate::buggify::{self, FaultConfig};
use crate::io::{Rng, SimulatedRng};
use crate::pagination::RecordPager;
use crate::record::{Attributes, Record, RecordKey, RegionId, TenantId};
use crate::write_path::{
    CreateOutcome, DeleteOutcome, RecordValidator, RejectReason, RetryPolicy, WritePathController,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type SimStore = SimulatedRecordStore<InMemoryRecordStore>;

#[derive(Debug, Clone)]
pub struct DirectoryDSTConfig {
    pub seed: u64,
    pub num_tenants: u64,
    /// Size of the student id pool per tenant; small pools force duplicates
    pub students_per_tenant: u64,
    pub page_size: usize,
    pub retry_attempts: u32,
    /// Times a failed page is re-requested before the scan is abandoned
    pub page_retries: u32,
    pub faults: FaultConfig,
}

impl DirectoryDSTConfig {
    pub fn calm(seed: u64) -> Self {
        DirectoryDSTConfig {
            seed,
            num_tenants: 3,
            students_per_tenant: 20,
            page_size: 4,
            retry_attempts: 3,
            page_retries: 3,
            faults: FaultConfig::disabled(),
        }
    }

    pub fn moderate(seed: u64) -> Self {
        DirectoryDSTConfig {
            faults: FaultConfig::moderate(),
            ..Self::calm(seed)
        }
    }

    /// Enough faults that the retry budget is regularly exhausted
    pub fn chaos(seed: u64) -> Self {
        DirectoryDSTConfig {
            num_tenants: 2,
            students_per_tenant: 10,
            page_size: 3,
            retry_attempts: 2,
            page_retries: 2,
            faults: FaultConfig::chaos(),
            ..Self::calm(seed)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub created: u64,
    pub duplicates: u64,
    pub deleted: u64,
    pub not_found: u64,
    pub validation_rejects: u64,
    pub unavailable: u64,
    pub enumerations_completed: u64,
    pub enumerations_abandoned: u64,
    pub faults_injected: u64,
    pub invariant_violations: Vec<String>,
}

impl DirectoryDSTResult {
    pub fn new(seed: u64) -> Self {
        DirectoryDSTResult {
            seed,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} created, {} dup, {} deleted, {} not-found, {} invalid, {} unavailable), \
             {} scans ok, {} abandoned, {} faults, {} violations",
            self.seed,
            self.total_operations,
            self.created,
            self.duplicates,
            self.deleted,
            self.not_found,
            self.validation_rejects,
            self.unavailable,
            self.enumerations_completed,
            self.enumerations_abandoned,
            self.faults_injected,
            self.invariant_violations.len()
        )
    }
}

pub struct DirectoryDSTHarness {
    config: DirectoryDSTConfig,
    rng: SimulatedRng,
    store: Arc<SimStore>,
    controller: WritePathController<SimStore>,
    shadow: BTreeMap<RecordKey, Record>,
    result: DirectoryDSTResult,
}

impl DirectoryDSTHarness {
    /// Installs `config.faults` for the current thread
    pub fn new(config: DirectoryDSTConfig) -> Self {
        buggify::set_config(config.faults.clone());

        let mut rng = SimulatedRng::new(config.seed);
        let inner = Arc::new(InMemoryRecordStore::with_scan_epoch(
            RegionId::new("sim-region"),
            rng.next_u64(),
        ));
        let store = Arc::new(SimulatedRecordStore::new(inner, rng.next_u64()));
        let controller = WritePathController::new(
            store.clone(),
            RecordValidator::default(),
            RetryPolicy::immediate(config.retry_attempts),
        );

        DirectoryDSTHarness {
            result: DirectoryDSTResult::new(config.seed),
            config,
            rng,
            store,
            controller,
            shadow: BTreeMap::new(),
        }
    }

    fn pick_tenant(&mut self) -> String {
        format!("school{}", self.rng.gen_range(0, self.config.num_tenants))
    }

    fn pick_student(&mut self) -> String {
        format!("S{:03}", self.rng.gen_range(0, self.config.students_per_tenant))
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("op {}: {}", self.result.total_operations, message));
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            match self.rng.gen_range(0, 100) {
                0..=44 => self.step_create().await,
                45..=49 => self.step_invalid_create().await,
                50..=79 => self.step_delete().await,
                80..=89 => self.step_get().await,
                _ => self.step_enumerate().await,
            }
            self.result.total_operations += 1;
        }
        self.result.faults_injected = self.store.stats().total_failures();
    }

    async fn step_create(&mut self) {
        let tenant = self.pick_tenant();
        let student = self.pick_student();
        let mut attrs = Attributes::new();
        attrs.insert("name", format!("student-{}", self.rng.gen_range(0, 1000)));
        attrs.insert("age", self.rng.gen_range(5, 25));

        let outcome = self.controller.create_record(&tenant, &student, attrs.clone()).await;
        let key = match RecordKey::parse(&tenant, &student) {
            Ok(key) => key,
            Err(err) => return self.violation(format!("generator built invalid key: {}", err)),
        };
        let existed = self.shadow.contains_key(&key);

        match outcome {
            CreateOutcome::Created(record) => {
                self.result.created += 1;
                if existed {
                    self.violation(format!("{} created while already live", key));
                }
                if record.version != 1 || record.attributes != attrs {
                    self.violation(format!("{} created with unexpected state {:?}", key, record));
                }
                self.shadow.insert(key.clone(), record);
            }
            CreateOutcome::Rejected(RejectReason::DuplicateId) => {
                self.result.duplicates += 1;
                if !existed {
                    self.violation(format!("{} reported duplicate but was absent", key));
                }
            }
            CreateOutcome::Rejected(RejectReason::StoreUnavailable) => {
                self.result.unavailable += 1;
            }
            CreateOutcome::Rejected(other) => {
                self.violation(format!("{} unexpected create rejection {:?}", key, other));
            }
        }
        self.check_key(&key).await;
    }

    async fn step_invalid_create(&mut self) {
        let tenant = self.pick_tenant();
        let student = self.pick_student();
        let outcome = self.controller.create_record(&tenant, &student, Attributes::new()).await;
        match outcome {
            CreateOutcome::Rejected(RejectReason::ValidationFailed(_)) => {
                self.result.validation_rejects += 1
            }
            other => self.violation(format!("missing name not rejected: {:?}", other)),
        }
    }

    async fn step_delete(&mut self) {
        let tenant = self.pick_tenant();
        let student = self.pick_student();
        let key = match RecordKey::parse(&tenant, &student) {
            Ok(key) => key,
            Err(err) => return self.violation(format!("generator built invalid key: {}", err)),
        };

        match self.controller.delete_record(&tenant, &student).await {
            DeleteOutcome::Deleted(record) => {
                self.result.deleted += 1;
                match self.shadow.remove(&key) {
                    Some(expected) if expected == record => {}
                    Some(expected) => self.violation(format!(
                        "{} deleted {:?}, expected {:?}",
                        key, record, expected
                    )),
                    None => self.violation(format!("{} deleted while absent", key)),
                }
            }
            DeleteOutcome::NotFound => {
                self.result.not_found += 1;
                if self.shadow.contains_key(&key) {
                    self.violation(format!("{} reported not found but was live", key));
                }
            }
            DeleteOutcome::Rejected(RejectReason::StoreUnavailable) => {
                self.result.unavailable += 1;
            }
            DeleteOutcome::Rejected(other) => {
                self.violation(format!("{} unexpected delete rejection {:?}", key, other));
            }
        }
        self.check_key(&key).await;
    }

    async fn step_get(&mut self) {
        let tenant = self.pick_tenant();
        let student = self.pick_student();
        let Ok(key) = RecordKey::parse(&tenant, &student) else {
            return;
        };
        // Faulty reads are fine; a successful read must agree with the shadow
        if let Ok(found) = self.store.get(&key).await {
            if found.as_ref() != self.shadow.get(&key) {
                self.violation(format!("{} read {:?}, shadow has {:?}", key, found, self.shadow.get(&key)));
            }
        }
    }

    async fn step_enumerate(&mut self) {
        let tenant = self.pick_tenant();
        let Ok(tenant_id) = TenantId::parse(&tenant) else {
            return;
        };
        let mut pager = RecordPager::new(self.store.clone(), tenant_id.clone(), self.config.page_size);
        let mut seen = Vec::new();

        loop {
            let mut attempts = 0;
            let page = loop {
                match pager.next_page().await {
                    Ok(page) => break Some(page),
                    Err(err) if err.is_retryable() && attempts < self.config.page_retries => {
                        attempts += 1;
                    }
                    Err(err) if err.is_retryable() => break None,
                    Err(err) => {
                        self.violation(format!("scan of {} failed terminally: {}", tenant, err));
                        return;
                    }
                }
            };
            match page {
                None => {
                    self.result.enumerations_abandoned += 1;
                    return;
                }
                Some(None) => break,
                Some(Some(items)) => {
                    if items.len() > self.config.page_size {
                        self.violation(format!("page of {} exceeds hint", items.len()));
                    }
                    seen.extend(items);
                }
            }
        }
        self.result.enumerations_completed += 1;

        let keys: Vec<RecordKey> = seen.iter().map(|r| r.key.clone()).collect();
        let distinct: BTreeSet<RecordKey> = keys.iter().cloned().collect();
        if distinct.len() != keys.len() {
            self.violation(format!("scan of {} returned duplicate keys", tenant));
        }
        let expected: BTreeSet<RecordKey> = self
            .shadow
            .keys()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        if distinct != expected {
            self.violation(format!(
                "scan of {} saw {} keys, expected {}",
                tenant,
                distinct.len(),
                expected.len()
            ));
        }
    }

    /// Ground truth for one key, read below the fault layer
    async fn check_key(&mut self, key: &RecordKey) {
        let actual = match self.store.inner().get(key).await {
            Ok(actual) => actual,
            Err(err) => return self.violation(format!("inner store failed: {}", err)),
        };
        if actual.as_ref() != self.shadow.get(key) {
            self.violation(format!(
                "{} diverged: store {:?}, shadow {:?}",
                key,
                actual,
                self.shadow.get(key)
            ));
        }
    }

    /// Compare the entire store against the shadow
    pub async fn check_final_state(&mut self) {
        let actual = self.store.inner().snapshot();
        let expected: Vec<Record> = self.shadow.values().cloned().collect();
        if actual != expected {
            self.violation(format!(
                "final state diverged: store has {} records, shadow {}",
                actual.len(),
                expected.len()
            ));
        }
    }

    pub fn result(&self) -> &DirectoryDSTResult {
        &self.result
    }

    pub fn into_result(self) -> DirectoryDSTResult {
        self.result
    }
}

/// Run `count` seeds starting at `start_seed`, returning every result
pub async fn run_dst_batch(
    start_seed: u64,
    count: u64,
    operations: usize,
    make_config: impl Fn(u64) -> DirectoryDSTConfig,
) -> Vec<DirectoryDSTResult> {
    let mut results = Vec::with_capacity(count as usize);
    for seed in start_seed..start_seed + count {
        let mut harness = DirectoryDSTHarness::new(make_config(seed));
        harness.run(operations).await;
        harness.check_final_state().await;
        results.push(harness.into_result());
    }
    buggify::set_config(FaultConfig::disabled());
    results
}
