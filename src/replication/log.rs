//! Outbound queue of locally produced deltas, drained by the gossip loop

use super::delta::ReplicationDelta;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct ReplicationLog {
    pending: Mutex<Vec<ReplicationDelta>>,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, delta: ReplicationDelta) {
        self.pending.lock().push(delta);
    }

    /// Take every pending delta, preserving the order they were recorded in
    pub fn drain(&self) -> Vec<ReplicationDelta> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
