//! Write Path Controller
//!
//! Turns external create/delete requests into store primitives. Owns the
//! only two local mutations in the engine:
//!
//! - `create_record`: validate, build the tenant-scoped key, `conditional_put`
//! - `delete_record`: build the key, `delete`
//!
//! Transient `Unavailable` failures are retried under a bounded
//! `RetryPolicy`; every other outcome is returned as a tagged result.
//! The controller never caches record state between calls. Replication
//! deltas are logged by the store itself, under the same lock as the
//! mutation they describe.

mod retry;
mod validation;

pub use retry::{RetryPolicy, RETRY_ATTEMPTS_MAX};
pub use validation::RecordValidator;

use crate::pagination::CursorError;
use crate::record::{Attributes, Record, RecordKey, ValidationError};
use crate::store::{PutOutcome, RecordStore, RemoveOutcome, StoreError};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("a record with this id already exists")]
    DuplicateId,
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),
    #[error("record store unavailable")]
    StoreUnavailable,
}

impl RejectReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::ValidationFailed(_) => "validation_failed",
            RejectReason::DuplicateId => "duplicate_id",
            RejectReason::InvalidCursor(_) => "invalid_cursor",
            RejectReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl From<StoreError> for RejectReason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => RejectReason::StoreUnavailable,
            StoreError::InvalidCursor(cursor) => RejectReason::InvalidCursor(cursor),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Record),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(Record),
    NotFound,
    Rejected(RejectReason),
}

pub struct WritePathController<S: RecordStore> {
    store: Arc<S>,
    validator: RecordValidator,
    retry: RetryPolicy,
}

impl<S: RecordStore> WritePathController<S> {
    pub fn new(store: Arc<S>, validator: RecordValidator, retry: RetryPolicy) -> Self {
        WritePathController {
            store,
            validator,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn create_record(
        &self,
        tenant_id: &str,
        student_id: &str,
        attributes: Attributes,
    ) -> CreateOutcome {
        let key = match RecordKey::parse(tenant_id, student_id) {
            Ok(key) => key,
            Err(err) => return CreateOutcome::Rejected(err.into()),
        };
        if let Err(err) = self.validator.validate(&attributes) {
            debug!(key = %key, error = %err, "create rejected by validation");
            return CreateOutcome::Rejected(err.into());
        }

        let result = self
            .retry
            .run("conditional_put", || {
                self.store.conditional_put(&key, attributes.clone())
            })
            .await;

        match result {
            Ok(PutOutcome::Created(record)) => {
                // TigerStyle: Postconditions
                debug_assert_eq!(record.key, key, "Postcondition: stored under requested key");
                debug_assert_eq!(record.version, 1, "Postcondition: fresh lifecycle");

                info!(key = %key, region = %record.last_writer_region, "record created");
                CreateOutcome::Created(record)
            }
            Ok(PutOutcome::AlreadyExists) => {
                debug!(key = %key, "create rejected: duplicate id");
                CreateOutcome::Rejected(RejectReason::DuplicateId)
            }
            Err(err) => CreateOutcome::Rejected(err.into()),
        }
    }

    pub async fn delete_record(&self, tenant_id: &str, student_id: &str) -> DeleteOutcome {
        let key = match RecordKey::parse(tenant_id, student_id) {
            Ok(key) => key,
            Err(err) => return DeleteOutcome::Rejected(err.into()),
        };

        match self.retry.run("delete", || self.store.delete(&key)).await {
            Ok(RemoveOutcome::Deleted(record)) => {
                info!(key = %key, version = record.version, "record deleted");
                DeleteOutcome::Deleted(record)
            }
            Ok(RemoveOutcome::NotFound) => DeleteOutcome::NotFound,
            Err(err) => DeleteOutcome::Rejected(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buggify::{self, faults, FaultConfig};
    use crate::record::RegionId;
    use crate::replication::ReplicationLog;
    use crate::store::{InMemoryRecordStore, SimulatedRecordStore};

    fn controller() -> WritePathController<InMemoryRecordStore> {
        WritePathController::new(
            Arc::new(InMemoryRecordStore::new(RegionId::new("us-east-1"))),
            RecordValidator::default(),
            RetryPolicy::immediate(3),
        )
    }

    fn named(name: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name", name);
        attrs
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let ctl = controller();
        let first = ctl.create_record("school1", "S001", named("Ada")).await;
        assert!(matches!(first, CreateOutcome::Created(ref r) if r.version == 1));

        let second = ctl.create_record("school1", "S001", named("Grace")).await;
        assert_eq!(second, CreateOutcome::Rejected(RejectReason::DuplicateId));

        // No silent overwrite
        let key = RecordKey::parse("school1", "S001").unwrap();
        let stored = ctl.store().get(&key).await.unwrap().unwrap();
        assert_eq!(stored.attributes.get("name"), Some(&"Ada".into()));
    }

    #[tokio::test]
    async fn test_validation_never_reaches_store() {
        let ctl = controller();
        let outcome = ctl.create_record("school1", "S001", Attributes::new()).await;
        assert_eq!(
            outcome,
            CreateOutcome::Rejected(RejectReason::ValidationFailed(ValidationError::MissingField(
                "name".into()
            )))
        );

        let outcome = ctl.create_record("school1", "  ", named("Ada")).await;
        assert!(matches!(
            outcome,
            CreateOutcome::Rejected(RejectReason::ValidationFailed(
                ValidationError::EmptyIdentifier("student_id")
            ))
        ));
        assert!(ctl.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let ctl = controller();
        ctl.create_record("school1", "S001", named("Ada")).await;

        assert!(matches!(ctl.delete_record("school1", "S001").await, DeleteOutcome::Deleted(_)));
        assert_eq!(ctl.delete_record("school1", "S001").await, DeleteOutcome::NotFound);
        assert_eq!(ctl.delete_record("school1", "never").await, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_accepted_writes_reach_change_log() {
        let outbox = Arc::new(ReplicationLog::new());
        let store = InMemoryRecordStore::new(RegionId::new("us-east-1")).with_change_log(outbox.clone());
        let ctl = WritePathController::new(
            Arc::new(store),
            RecordValidator::default(),
            RetryPolicy::immediate(3),
        );

        ctl.create_record("school1", "S001", named("Ada")).await;
        ctl.create_record("school1", "S001", named("Ada")).await;
        ctl.delete_record("school1", "S001").await;
        ctl.delete_record("school1", "S001").await;

        let deltas = outbox.drain();
        assert_eq!(deltas.len(), 2);
        assert!(!deltas[0].is_delete());
        assert!(deltas[1].is_delete());
        assert_eq!(deltas[1].stamp().version, 2);
    }

    #[tokio::test]
    async fn test_unavailable_exhausts_retries() {
        buggify::set_config(FaultConfig::new().with(faults::store::PUT_UNAVAILABLE, 1.0));
        let inner = Arc::new(InMemoryRecordStore::new(RegionId::new("us-east-1")));
        let store = Arc::new(SimulatedRecordStore::new(inner, 5));
        let ctl = WritePathController::new(
            store.clone(),
            RecordValidator::default(),
            RetryPolicy::immediate(4),
        );

        let outcome = ctl.create_record("school1", "S001", named("Ada")).await;
        assert_eq!(outcome, CreateOutcome::Rejected(RejectReason::StoreUnavailable));
        assert_eq!(store.stats().put_failures, 4);
        buggify::set_config(FaultConfig::disabled());
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RejectReason::DuplicateId.code(), "duplicate_id");
        assert_eq!(
            RejectReason::from(StoreError::Unavailable("x".into())),
            RejectReason::StoreUnavailable
        );
        assert_eq!(
            RejectReason::from(StoreError::InvalidCursor(CursorError::Stale)).code(),
            "invalid_cursor"
        );
    }
}
