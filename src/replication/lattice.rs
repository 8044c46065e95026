use crate::record::RegionId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Version/region pair that totally orders writes to one key.
///
/// Higher `version` wins outright; on an exact version tie the region that
/// sorts lexicographically greater wins. This is a deterministic tie-break,
/// not a causal merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteStamp {
    pub version: u64,
    pub region: RegionId,
}

impl WriteStamp {
    pub fn new(version: u64, region: RegionId) -> Self {
        WriteStamp { version, region }
    }

    /// Stamp of the first write of a fresh key lifecycle
    pub fn initial(region: RegionId) -> Self {
        WriteStamp { version: 1, region }
    }

    /// Stamp for the next write to the same key, produced in `region`
    pub fn successor(&self, region: RegionId) -> Self {
        debug_assert!(self.version < u64::MAX, "Precondition: version overflow");
        WriteStamp {
            version: self.version + 1,
            region,
        }
    }
}

impl PartialOrd for WriteStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WriteStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.version.cmp(&other.version) {
            Ordering::Equal => self.region.cmp(&other.region),
            other => other,
        }
    }
}

/// Which side survives a conflicting write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Incoming,
}

/// Last-writer-wins decision. Equal stamps keep the local write, which is
/// what makes re-applying a delta a no-op.
pub fn resolve(local: &WriteStamp, incoming: &WriteStamp) -> Winner {
    if incoming > local {
        Winner::Incoming
    } else {
        Winner::Local
    }
}

/// LWW register over an optional value. `None` is an absence, not a
/// tombstone: it carries no stamp and loses to any write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LwwSlot<T> {
    pub entry: Option<(WriteStamp, T)>,
}

impl<T: Clone> LwwSlot<T> {
    pub fn empty() -> Self {
        LwwSlot { entry: None }
    }

    pub fn with_value(stamp: WriteStamp, value: T) -> Self {
        LwwSlot {
            entry: Some((stamp, value)),
        }
    }

    pub fn stamp(&self) -> Option<&WriteStamp> {
        self.entry.as_ref().map(|(stamp, _)| stamp)
    }

    pub fn get(&self) -> Option<&T> {
        self.entry.as_ref().map(|(_, value)| value)
    }

    /// Merge two slots, keeping the greater stamp
    pub fn merge(&self, other: &Self) -> Self {
        match (&self.entry, &other.entry) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some((local, _)), Some((incoming, _))) => match resolve(local, incoming) {
                Winner::Local => self.clone(),
                Winner::Incoming => other.clone(),
            },
        }
    }
}
