//! ReplicationDelta - a single local write shipped to peer regions

use super::lattice::WriteStamp;
use crate::record::{Record, RecordKey, RegionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationDelta {
    /// A record created (or overwritten) in the source region
    Upsert { record: Record },
    /// Removal of the key, stamped one version past the removed record
    Delete { key: RecordKey, stamp: WriteStamp },
}

impl ReplicationDelta {
    pub fn upsert(record: Record) -> Self {
        ReplicationDelta::Upsert { record }
    }

    /// Build the delete delta for a record just removed in `region`
    pub fn delete(removed: &Record, region: RegionId) -> Self {
        ReplicationDelta::Delete {
            key: removed.key.clone(),
            stamp: removed.stamp().successor(region),
        }
    }

    pub fn key(&self) -> &RecordKey {
        match self {
            ReplicationDelta::Upsert { record } => &record.key,
            ReplicationDelta::Delete { key, .. } => key,
        }
    }

    pub fn stamp(&self) -> WriteStamp {
        match self {
            ReplicationDelta::Upsert { record } => record.stamp(),
            ReplicationDelta::Delete { stamp, .. } => stamp.clone(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ReplicationDelta::Delete { .. })
    }
}
