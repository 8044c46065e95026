//! TCP gossip between regions
//!
//! Every tick the manager drains the local `ReplicationLog` into a
//! numbered queue per peer and pushes the queue over a fresh connection.
//! A peer that cannot be reached keeps its queue (bounded by `max_backlog`,
//! oldest dropped first) for the next tick; a peer with nothing queued gets
//! a heartbeat. Incoming batches pass through an `InboundSequencer` so each
//! source's writes are applied in the order that source made them, however
//! the connections carrying them interleave.

use crate::io::{ProductionRng, Rng};
use crate::record::RegionId;
use crate::replication::gossip::{read_frame, write_frame};
use crate::replication::{
    GossipError, GossipMessage, InboundSequencer, ReplicationConfig, ReplicationCoordinator,
    ReplicationDelta, ReplicationLog,
};
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Deltas per frame, keeping frames well under the wire limit
pub const BATCH_DELTAS_MAX: usize = 500;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one push round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipRoundReport {
    pub deltas_sent: u64,
    pub heartbeats_sent: u64,
    pub peers_reached: u64,
    pub peers_failed: u64,
    /// Backlog entries discarded because a peer stayed unreachable
    pub deltas_dropped: u64,
}

/// Deltas queued for one peer. `front_seq` numbers `deltas[0]`.
#[derive(Debug, Default)]
struct PeerQueue {
    front_seq: u64,
    /// Everything below was dropped unsent
    floor: u64,
    deltas: VecDeque<ReplicationDelta>,
}

impl PeerQueue {
    fn next_seq(&self) -> u64 {
        self.front_seq + self.deltas.len() as u64
    }

    fn enqueue(&mut self, fresh: &[ReplicationDelta], max_backlog: usize) -> u64 {
        self.deltas.extend(fresh.iter().cloned());
        let mut dropped = 0;
        while self.deltas.len() > max_backlog {
            self.deltas.pop_front();
            self.front_seq += 1;
            dropped += 1;
        }
        if dropped > 0 {
            self.floor = self.front_seq;
        }
        dropped
    }

    /// Forget every delta numbered below `through`
    fn acknowledge(&mut self, through: u64) {
        while self.front_seq < through && self.deltas.pop_front().is_some() {
            self.front_seq += 1;
        }
    }
}

/// What one tick sends to a peer
enum Outgoing {
    Batch {
        first_seq: u64,
        floor: u64,
        deltas: Vec<ReplicationDelta>,
    },
    Heartbeat {
        next_seq: u64,
    },
}

pub struct GossipManager<S: RecordStore> {
    config: ReplicationConfig,
    region: RegionId,
    /// Fresh per process so peers restart their sequence tracking
    session: u64,
    outbox: Arc<ReplicationLog>,
    coordinator: Arc<ReplicationCoordinator<S>>,
    backlog: Mutex<HashMap<String, PeerQueue>>,
    /// Held across applies so one source's batches never interleave
    inbound: tokio::sync::Mutex<InboundSequencer>,
}

impl<S: RecordStore> GossipManager<S> {
    pub fn new(
        config: ReplicationConfig,
        outbox: Arc<ReplicationLog>,
        coordinator: Arc<ReplicationCoordinator<S>>,
    ) -> Self {
        let region = coordinator.local_region().clone();
        let backlog = config
            .peers
            .iter()
            .map(|peer| (peer.clone(), PeerQueue::default()))
            .collect();
        GossipManager {
            config,
            region,
            session: ProductionRng::new().next_u64(),
            outbox,
            coordinator,
            backlog: Mutex::new(backlog),
            inbound: tokio::sync::Mutex::new(InboundSequencer::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator<S>> {
        &self.coordinator
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deltas waiting for `peer`
    pub fn backlog_len(&self, peer: &str) -> usize {
        self.backlog.lock().get(peer).map_or(0, |queue| queue.deltas.len())
    }

    /// Accept peer connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(region = %self.region, addr = ?listener.local_addr().ok(), "gossip listener started");
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!(peer = %addr, "gossip connection accepted");
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.handle_peer_connection(stream).await {
                    warn!(peer = %addr, error = %e, "gossip peer error");
                }
            });
        }
    }

    async fn handle_peer_connection(&self, mut stream: TcpStream) -> Result<(), GossipError> {
        while let Some(message) = read_frame(&mut stream).await? {
            self.receive(message).await;
        }
        Ok(())
    }

    /// Sequence one inbound message and apply whatever it releases
    pub async fn receive(&self, message: GossipMessage) {
        let mut inbound = self.inbound.lock().await;
        let (source, ready) = match message {
            GossipMessage::DeltaBatch {
                source_region,
                session,
                first_seq,
                floor,
                deltas,
            } => {
                let received = deltas.len();
                let ready = inbound.offer(&source_region, session, first_seq, floor, deltas);
                debug!(
                    source = %source_region,
                    first_seq,
                    received,
                    released = ready.len(),
                    held = inbound.held_len(&source_region),
                    "delta batch received"
                );
                (source_region, ready)
            }
            GossipMessage::Heartbeat {
                source_region,
                session,
                next_seq,
            } => {
                let ready = inbound.observe_heartbeat(&source_region, session, next_seq);
                debug!(source = %source_region, next_seq, "heartbeat");
                (source_region, ready)
            }
        };
        if ready.is_empty() {
            return;
        }

        let report = self.coordinator.apply_batch(&source, &ready).await;
        debug!(
            source = %source,
            applied = report.applied,
            superseded = report.superseded,
            ignored = report.ignored,
            failed = report.failed,
            "applied delta batch"
        );
    }

    /// Move freshly recorded deltas into every peer's queue, then try to
    /// flush each queue
    pub async fn gossip_once(&self) -> GossipRoundReport {
        let mut report = GossipRoundReport::default();
        let fresh = self.outbox.drain();

        for peer in &self.config.peers {
            let outgoing = {
                let mut backlog = self.backlog.lock();
                let queue = backlog.entry(peer.clone()).or_default();
                report.deltas_dropped += queue.enqueue(&fresh, self.config.max_backlog);
                if queue.deltas.is_empty() {
                    Outgoing::Heartbeat {
                        next_seq: queue.next_seq(),
                    }
                } else {
                    Outgoing::Batch {
                        first_seq: queue.front_seq,
                        floor: queue.floor,
                        deltas: queue.deltas.iter().cloned().collect(),
                    }
                }
            };

            match self.push(peer, &outgoing).await {
                Ok(()) => {
                    match outgoing {
                        Outgoing::Batch {
                            first_seq, deltas, ..
                        } => {
                            if let Some(queue) = self.backlog.lock().get_mut(peer) {
                                queue.acknowledge(first_seq + deltas.len() as u64);
                            }
                            report.deltas_sent += deltas.len() as u64;
                        }
                        Outgoing::Heartbeat { .. } => report.heartbeats_sent += 1,
                    }
                    report.peers_reached += 1;
                }
                Err(e) => {
                    warn!(peer = %peer, pending = self.backlog_len(peer), error = %e, "gossip push failed");
                    report.peers_failed += 1;
                }
            }
        }

        if report.deltas_dropped > 0 {
            error!(dropped = report.deltas_dropped, "gossip backlog overflow, deltas discarded");
        }
        report
    }

    async fn push(&self, peer: &str, outgoing: &Outgoing) -> Result<(), GossipError> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(peer))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        match outgoing {
            Outgoing::Batch {
                first_seq,
                floor,
                deltas,
            } => {
                let mut seq = *first_seq;
                for chunk in deltas.chunks(BATCH_DELTAS_MAX) {
                    let message = GossipMessage::delta_batch(
                        self.region.clone(),
                        self.session,
                        seq,
                        *floor,
                        chunk.to_vec(),
                    );
                    write_frame(&mut stream, &message).await?;
                    seq += chunk.len() as u64;
                }
            }
            Outgoing::Heartbeat { next_seq } => {
                let message = GossipMessage::heartbeat(self.region.clone(), self.session, *next_seq);
                write_frame(&mut stream, &message).await?;
            }
        }
        Ok(())
    }

    /// Push on every gossip interval, forever
    pub async fn run(self: Arc<Self>) {
        let period = self.config.gossip_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            region = %self.region,
            peers = self.config.peers.len(),
            interval_ms = period.as_millis() as u64,
            "gossip loop started"
        );

        loop {
            ticker.tick().await;
            let report = self.gossip_once().await;
            if report.deltas_sent > 0 || report.peers_failed > 0 {
                debug!(
                    sent = report.deltas_sent,
                    reached = report.peers_reached,
                    failed = report.peers_failed,
                    "gossip round"
                );
            }
        }
    }
}
