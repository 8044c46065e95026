//! Deterministic Simulation Testing for cross-region convergence
//!
//! Several regions, each with its own store, write path and coordinator,
//! exchange numbered delta batches over a simulated network that drops,
//! duplicates and delays them. Dropped batches are resent on a later round
//! the way the gossip backlog does it, and delayed batches let later ones
//! from the same source overtake them. Every region sequences what it
//! receives with an `InboundSequencer`.
//!
//! Two workloads:
//! - phased: a round of racing writes from any region, then a full sync.
//!   Without tombstones only writes concurrent within one phase are
//!   guaranteed to converge, so every phase ends in a sync.
//! - mixed: each key is written by one owning region only, which creates
//!   and deletes it freely while batches are in flight. The owner's history
//!   is sequential, so every region must end up with the owner's state.
//!
//! Checked after every sync:
//! - all regions hold identical record sets
//! - a key raced by several creators ends up owned by the greatest region
//! - no change log holds deltas (remote applies are never echoed)

use super::coordinator::ReplicationCoordinator;
use super::delta::ReplicationDelta;
use super::inbound::InboundSequencer;
use super::log::ReplicationLog;
use crate::buggify::{self, faults, FaultConfig};
use crate::io::{Rng, SimulatedRng};
use crate::record::{Attributes, RecordKey, RegionId};
use crate::store::{InMemoryRecordStore, RecordStore};
use crate::write_path::{CreateOutcome, RecordValidator, RetryPolicy, WritePathController};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const REGION_NAMES: &[&str] = &["ap-south-1", "eu-west-1", "sa-east-1", "us-east-1", "us-west-2"];
/// Rounds after which delivery faults are suppressed so a sync terminates
const SYNC_ROUNDS_MAX: usize = 32;
/// Mixed-mode writes between two gossip ticks
const MIXED_TICK_OPERATIONS: usize = 4;

#[derive(Debug, Clone)]
pub struct ConvergenceDSTConfig {
    pub seed: u64,
    pub num_regions: usize,
    pub num_tenants: u64,
    pub students_per_tenant: u64,
    pub faults: FaultConfig,
}

impl ConvergenceDSTConfig {
    pub fn calm(seed: u64) -> Self {
        ConvergenceDSTConfig {
            seed,
            num_regions: 3,
            num_tenants: 2,
            students_per_tenant: 8,
            faults: FaultConfig::disabled(),
        }
    }

    pub fn chaos(seed: u64) -> Self {
        ConvergenceDSTConfig {
            num_regions: REGION_NAMES.len(),
            faults: FaultConfig::chaos(),
            ..Self::calm(seed)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvergenceDSTResult {
    pub seed: u64,
    pub writes: u64,
    pub syncs: u64,
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub batches_duplicated: u64,
    /// Batches that arrived ahead of an earlier one from the same source
    pub batches_reordered: u64,
    pub invariant_violations: Vec<String>,
}

impl ConvergenceDSTResult {
    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} writes, {} syncs, {} batches ({} dropped, {} duplicated, {} reordered), {} violations",
            self.seed,
            self.writes,
            self.syncs,
            self.batches_delivered,
            self.batches_dropped,
            self.batches_duplicated,
            self.batches_reordered,
            self.invariant_violations.len()
        )
    }
}

struct Region {
    id: RegionId,
    session: u64,
    store: Arc<InMemoryRecordStore>,
    writer: WritePathController<InMemoryRecordStore>,
    coordinator: ReplicationCoordinator<InMemoryRecordStore>,
    change_log: Arc<ReplicationLog>,
    /// Next sequence number per destination region
    next_seq: Vec<u64>,
    inbound: InboundSequencer,
}

impl Region {
    fn new(name: &str, session: u64, num_regions: usize) -> Self {
        let id = RegionId::new(name);
        let change_log = Arc::new(ReplicationLog::new());
        let store = Arc::new(InMemoryRecordStore::new(id.clone()).with_change_log(change_log.clone()));
        Region {
            writer: WritePathController::new(
                store.clone(),
                RecordValidator::permissive(),
                RetryPolicy::no_retry(),
            ),
            coordinator: ReplicationCoordinator::new(store.clone(), RetryPolicy::no_retry()),
            id,
            session,
            store,
            change_log,
            next_seq: vec![0; num_regions],
            inbound: InboundSequencer::new(),
        }
    }
}

/// Batch in flight from `from` to `to`
struct InFlight {
    from: usize,
    to: usize,
    first_seq: u64,
    deltas: Vec<ReplicationDelta>,
}

pub struct ConvergenceDSTHarness {
    config: ConvergenceDSTConfig,
    rng: SimulatedRng,
    regions: Vec<Region>,
    in_flight: Vec<InFlight>,
    /// Creators of each key during the current create round
    creators: BTreeMap<RecordKey, BTreeSet<RegionId>>,
    result: ConvergenceDSTResult,
}

impl ConvergenceDSTHarness {
    pub fn new(config: ConvergenceDSTConfig) -> Self {
        debug_assert!(
            (2..=REGION_NAMES.len()).contains(&config.num_regions),
            "Precondition: between 2 and {} regions",
            REGION_NAMES.len()
        );
        buggify::set_config(config.faults.clone());

        let mut rng = SimulatedRng::new(config.seed);
        let regions = REGION_NAMES
            .iter()
            .take(config.num_regions)
            .map(|name| Region::new(name, rng.next_u64(), config.num_regions))
            .collect();
        ConvergenceDSTHarness {
            rng,
            result: ConvergenceDSTResult {
                seed: config.seed,
                ..Default::default()
            },
            config,
            regions,
            in_flight: Vec::new(),
            creators: BTreeMap::new(),
        }
    }

    fn pick_key(&mut self) -> (u64, String, String) {
        let student = self.rng.gen_range(0, self.config.students_per_tenant);
        (
            student,
            format!("school{}", self.rng.gen_range(0, self.config.num_tenants)),
            format!("S{:02}", student),
        )
    }

    fn pick_region(&mut self) -> usize {
        self.rng.gen_range(0, self.regions.len() as u64) as usize
    }

    /// Racing creates: every region writes locally before anything replicates
    pub async fn create_round(&mut self, operations: usize) {
        self.creators.clear();
        for _ in 0..operations {
            let (_, tenant, student) = self.pick_key();
            let idx = self.pick_region();
            let mut attrs = Attributes::new();
            attrs.insert("name", format!("{}@{}", student, self.regions[idx].id));

            if let CreateOutcome::Created(record) =
                self.regions[idx].writer.create_record(&tenant, &student, attrs).await
            {
                self.creators
                    .entry(record.key)
                    .or_default()
                    .insert(self.regions[idx].id.clone());
            }
            self.result.writes += 1;
        }
    }

    /// Racing deletes of whatever each region currently holds
    pub async fn delete_round(&mut self, operations: usize) {
        self.creators.clear();
        for _ in 0..operations {
            let (_, tenant, student) = self.pick_key();
            let idx = self.pick_region();
            self.regions[idx].writer.delete_record(&tenant, &student).await;
            self.result.writes += 1;
        }
    }

    /// Creates and deletes interleaved with partial gossip. Each student id
    /// is owned by one region, which alone writes it during the round.
    pub async fn mixed_round(&mut self, operations: usize) {
        self.creators.clear();
        for op in 0..operations {
            let (student_idx, tenant, student) = self.pick_key();
            let owner = (student_idx % self.regions.len() as u64) as usize;
            if self.rng.gen_bool(0.5) {
                let mut attrs = Attributes::new();
                attrs.insert("name", format!("{}@{}#{}", student, self.regions[owner].id, op));
                self.regions[owner].writer.create_record(&tenant, &student, attrs).await;
            } else {
                self.regions[owner].writer.delete_record(&tenant, &student).await;
            }
            self.result.writes += 1;

            if (op + 1) % MIXED_TICK_OPERATIONS == 0 {
                self.cut_batches();
                self.deliver_some().await;
            }
        }
    }

    /// Turn every region's change log into one numbered batch per peer
    fn cut_batches(&mut self) {
        let num_regions = self.regions.len();
        for from in 0..num_regions {
            let deltas = self.regions[from].change_log.drain();
            if deltas.is_empty() {
                continue;
            }
            for to in (0..num_regions).filter(|&to| to != from) {
                let first_seq = self.regions[from].next_seq[to];
                self.regions[from].next_seq[to] += deltas.len() as u64;
                self.in_flight.push(InFlight {
                    from,
                    to,
                    first_seq,
                    deltas: deltas.clone(),
                });
            }
        }
    }

    /// Deliver a random half of the batches in flight, in random order
    async fn deliver_some(&mut self) {
        self.rng.shuffle(&mut self.in_flight);
        let mut kept = Vec::new();
        for batch in std::mem::take(&mut self.in_flight) {
            if self.rng.gen_bool(0.5) {
                kept.push(batch);
            } else if let Some(retry) = self.deliver(batch).await {
                kept.push(retry);
            }
        }
        self.in_flight = kept;
    }

    /// Deliver one batch through the network faults. Returns the batch when
    /// it must be sent again later.
    async fn deliver(&mut self, batch: InFlight) -> Option<InFlight> {
        if crate::buggify!(&mut self.rng, faults::replication::DELTA_DROP) {
            self.result.batches_dropped += 1;
            return Some(batch);
        }
        if crate::buggify!(&mut self.rng, faults::replication::DELTA_REORDER) {
            return Some(batch);
        }
        let copies = if crate::buggify!(&mut self.rng, faults::replication::DELTA_DUPLICATE) {
            self.result.batches_duplicated += 1;
            2
        } else {
            1
        };

        let source = self.regions[batch.from].id.clone();
        let session = self.regions[batch.from].session;
        let target = &mut self.regions[batch.to];
        if batch.first_seq > target.inbound.next_seq(&source).unwrap_or(0) {
            self.result.batches_reordered += 1;
        }
        for _ in 0..copies {
            let ready = target
                .inbound
                .offer(&source, session, batch.first_seq, 0, batch.deltas.clone());
            let report = target.coordinator.apply_batch(&source, &ready).await;
            if report.failed > 0 {
                self.result.invariant_violations.push(format!(
                    "{} failed to apply {} deltas",
                    target.id, report.failed
                ));
            }
        }
        self.result.batches_delivered += 1;
        None
    }

    /// Deliver everything in flight until every batch has arrived
    pub async fn sync(&mut self) {
        self.cut_batches();

        let mut round = 0;
        while !self.in_flight.is_empty() {
            let _quiet = (round >= SYNC_ROUNDS_MAX).then(buggify::BuggifySuppressor::new);
            self.rng.shuffle(&mut self.in_flight);
            let mut retry = Vec::new();
            for batch in std::mem::take(&mut self.in_flight) {
                if let Some(batch) = self.deliver(batch).await {
                    retry.push(batch);
                }
            }
            self.in_flight = retry;
            round += 1;
        }

        self.result.syncs += 1;
        self.check_convergence();
    }

    fn check_convergence(&mut self) {
        let reference = self.regions[0].store.snapshot();
        for region in &self.regions[1..] {
            let snapshot = region.store.snapshot();
            if snapshot != reference {
                self.result.invariant_violations.push(format!(
                    "sync {}: {} holds {} records, {} holds {}",
                    self.result.syncs,
                    region.id,
                    snapshot.len(),
                    self.regions[0].id,
                    reference.len()
                ));
            }
        }

        for record in &reference {
            if let Some(creators) = self.creators.get(&record.key) {
                let expected = creators.iter().max();
                if expected != Some(&record.last_writer_region) {
                    self.result.invariant_violations.push(format!(
                        "{} owned by {}, expected {:?}",
                        record.key, record.last_writer_region, expected
                    ));
                }
            }
        }

        for region in &self.regions {
            if !region.change_log.is_empty() {
                self.result.invariant_violations.push(format!(
                    "{} echoed {} remote writes",
                    region.id,
                    region.change_log.len()
                ));
            }
            for source in &self.regions {
                let held = region.inbound.held_len(&source.id);
                if held > 0 {
                    self.result
                        .invariant_violations
                        .push(format!("{} still holds {} batches from {}", region.id, held, source.id));
                }
            }
        }
    }

    /// Alternate create and delete phases, syncing after each
    pub async fn run(&mut self, phases: usize, operations_per_phase: usize) {
        for phase in 0..phases {
            if phase % 2 == 0 {
                self.create_round(operations_per_phase).await;
            } else {
                self.delete_round(operations_per_phase).await;
            }
            self.sync().await;
        }
    }

    /// Mixed rounds, syncing after each
    pub async fn run_mixed(&mut self, phases: usize, operations_per_phase: usize) {
        for _ in 0..phases {
            self.mixed_round(operations_per_phase).await;
            self.sync().await;
        }
    }

    /// Number of records every region agrees on; only meaningful after a sync
    pub fn converged_len(&self) -> usize {
        self.regions[0].store.snapshot().len()
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        self.regions.iter().map(|r| r.store.region().clone()).collect()
    }

    pub fn result(&self) -> &ConvergenceDSTResult {
        &self.result
    }

    pub fn into_result(self) -> ConvergenceDSTResult {
        buggify::set_config(FaultConfig::disabled());
        self.result
    }
}
