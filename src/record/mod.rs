//! Record data model
//!
//! A record is addressed by the composite key `(tenant_id, student_id)`.
//! All records of one tenant share a partition, so tenant isolation falls
//! out of the key layout rather than out of request-handling code.
//!
//! # TigerStyle Invariants
//!
//! - Identifiers are non-empty, trimmed and at most `IDENTIFIER_LEN_MAX` bytes
//! - `version` starts at 1 for every fresh key lifecycle
//! - `last_writer_region` always names the region that produced `version`

mod attributes;

pub use attributes::Attributes;

use crate::replication::WriteStamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on tenant/student identifier length in bytes
pub const IDENTIFIER_LEN_MAX: usize = 128;

/// Rejection raised before a request ever reaches the store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),
    #[error("{field} exceeds {max} bytes")]
    IdentifierTooLong { field: &'static str, max: usize },
    #[error("required attribute '{0}' is missing or empty")]
    MissingField(String),
}

fn parse_identifier(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyIdentifier(field));
    }
    if trimmed.len() > IDENTIFIER_LEN_MAX {
        return Err(ValidationError::IdentifierTooLong {
            field,
            max: IDENTIFIER_LEN_MAX,
        });
    }
    Ok(trimmed.to_string())
}

/// Owning school/organization. Assigned at provisioning, never reused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        parse_identifier("tenant_id", raw).map(TenantId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied student identifier, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        parse_identifier("student_id", raw).map(StudentId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Region identifier. Ordering is byte-lexicographic, which the
/// replication tie-break relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty(), "Precondition: region id must not be empty");
        RegionId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite record key. Sorting groups keys by tenant first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub tenant_id: TenantId,
    pub student_id: StudentId,
}

impl RecordKey {
    pub fn new(tenant_id: TenantId, student_id: StudentId) -> Self {
        RecordKey {
            tenant_id,
            student_id,
        }
    }

    /// Parse both halves of a key from raw request input
    pub fn parse(tenant_id: &str, student_id: &str) -> Result<Self, ValidationError> {
        Ok(RecordKey {
            tenant_id: TenantId::parse(tenant_id)?,
            student_id: StudentId::parse(student_id)?,
        })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.student_id)
    }
}

/// A stored student record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub attributes: Attributes,
    /// Assigned by the store; strictly increases on every accepted write
    pub version: u64,
    pub last_writer_region: RegionId,
}

impl Record {
    /// First version of a fresh key lifecycle
    pub fn first_version(key: RecordKey, attributes: Attributes, region: RegionId) -> Self {
        Record {
            key,
            attributes,
            version: 1,
            last_writer_region: region,
        }
    }

    /// Stamp used for last-writer-wins comparison
    pub fn stamp(&self) -> WriteStamp {
        WriteStamp::new(self.version, self.last_writer_region.clone())
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.key.tenant_id
    }

    pub fn student_id(&self) -> &StudentId {
        &self.key.student_id
    }
}
