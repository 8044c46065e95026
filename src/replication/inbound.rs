//! Per-source ordering of inbound delta batches
//!
//! A sender numbers the deltas it queues for each peer, starting at zero
//! in every session. Batches may arrive over different connections in any
//! order, but without tombstones a delete that overtakes its create is lost,
//! so batches from one source are released strictly in sequence order:
//! early batches are held back and replayed ranges are trimmed.
//!
//! A gap in the sequence is skipped only when:
//! - the sender raises its `floor` after dropping backlog it will never resend
//! - more than `HELD_BATCHES_MAX` batches are waiting behind it
//! - `STALLED_HEARTBEATS_MAX` consecutive heartbeats report the sender has
//!   nothing older left to send

use super::delta::ReplicationDelta;
use crate::record::RegionId;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

// TigerStyle: Explicit limits with _MAX suffix
pub const HELD_BATCHES_MAX: usize = 64;
pub const STALLED_HEARTBEATS_MAX: u32 = 3;

#[derive(Debug)]
struct SourceStream {
    session: u64,
    next_seq: u64,
    held: BTreeMap<u64, Vec<ReplicationDelta>>,
    stalled_heartbeats: u32,
}

impl SourceStream {
    fn new(session: u64, next_seq: u64) -> Self {
        SourceStream {
            session,
            next_seq,
            held: BTreeMap::new(),
            stalled_heartbeats: 0,
        }
    }

    /// Release the part of a batch starting at `first_seq` not yet released
    fn release(&mut self, first_seq: u64, deltas: Vec<ReplicationDelta>, ready: &mut Vec<ReplicationDelta>) {
        debug_assert!(first_seq <= self.next_seq, "Precondition: batch must not start past a gap");

        let end = first_seq + deltas.len() as u64;
        if end <= self.next_seq {
            return;
        }
        let skip = (self.next_seq - first_seq) as usize;
        ready.extend(deltas.into_iter().skip(skip));
        self.next_seq = end;
    }

    fn hold(&mut self, first_seq: u64, deltas: Vec<ReplicationDelta>) {
        // A resend from the same position may carry more deltas; keep the longest
        let longer = self
            .held
            .get(&first_seq)
            .map_or(true, |held| held.len() < deltas.len());
        if longer {
            self.held.insert(first_seq, deltas);
        }
    }

    fn drain_held(&mut self, ready: &mut Vec<ReplicationDelta>) {
        while let Some(entry) = self.held.first_entry() {
            if *entry.key() > self.next_seq {
                break;
            }
            let (first_seq, deltas) = entry.remove_entry();
            self.release(first_seq, deltas, ready);
        }
    }

    fn skip_to(&mut self, seq: u64) {
        if seq > self.next_seq {
            self.next_seq = seq;
        }
    }
}

#[derive(Debug, Default)]
pub struct InboundSequencer {
    streams: HashMap<RegionId, SourceStream>,
}

impl InboundSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self, source: &RegionId, session: u64, floor: u64) -> &mut SourceStream {
        let stream = self
            .streams
            .entry(source.clone())
            .or_insert_with(|| SourceStream::new(session, floor));
        if stream.session != session {
            debug!(source = %source, session, "new gossip session from source");
            *stream = SourceStream::new(session, floor);
        }
        stream
    }

    /// Sequence number expected next from `source`
    pub fn next_seq(&self, source: &RegionId) -> Option<u64> {
        self.streams.get(source).map(|stream| stream.next_seq)
    }

    /// Batches from `source` waiting on an earlier one
    pub fn held_len(&self, source: &RegionId) -> usize {
        self.streams.get(source).map_or(0, |stream| stream.held.len())
    }

    /// Accept a batch covering `first_seq..first_seq + deltas.len()` and
    /// return every delta now ready to apply, in origin order
    pub fn offer(
        &mut self,
        source: &RegionId,
        session: u64,
        first_seq: u64,
        floor: u64,
        deltas: Vec<ReplicationDelta>,
    ) -> Vec<ReplicationDelta> {
        let stream = self.stream(source, session, floor);
        stream.stalled_heartbeats = 0;

        if floor > stream.next_seq {
            warn!(
                source = %source,
                from = stream.next_seq,
                to = floor,
                "sender dropped backlog, skipping gap"
            );
            stream.skip_to(floor);
        }

        let mut ready = Vec::new();
        if first_seq <= stream.next_seq {
            stream.release(first_seq, deltas, &mut ready);
        } else {
            stream.hold(first_seq, deltas);
            if stream.held.len() > HELD_BATCHES_MAX {
                if let Some(&lowest) = stream.held.keys().next() {
                    warn!(
                        source = %source,
                        from = stream.next_seq,
                        to = lowest,
                        "gap never filled, skipping"
                    );
                    stream.skip_to(lowest);
                }
            }
        }
        stream.drain_held(&mut ready);
        ready
    }

    /// A heartbeat says every delta below `next_seq` has left the sender.
    /// Returns held deltas released by closing a stalled gap.
    pub fn observe_heartbeat(&mut self, source: &RegionId, session: u64, next_seq: u64) -> Vec<ReplicationDelta> {
        let stream = self.stream(source, session, 0);
        let mut ready = Vec::new();
        if next_seq <= stream.next_seq {
            stream.stalled_heartbeats = 0;
            return ready;
        }

        stream.stalled_heartbeats += 1;
        if stream.stalled_heartbeats >= STALLED_HEARTBEATS_MAX {
            let target = stream
                .held
                .keys()
                .next()
                .copied()
                .map_or(next_seq, |lowest| lowest.min(next_seq));
            warn!(source = %source, from = stream.next_seq, to = target, "stalled gap closed by heartbeat");
            stream.skip_to(target);
            stream.stalled_heartbeats = 0;
            stream.drain_held(&mut ready);
        }
        ready
    }
}
