//! Transport-agnostic request boundary
//!
//! Every inbound request resolves to exactly one tagged `Response`. Nothing
//! here knows about HTTP; `production::http` maps responses to status codes.

use crate::record::{Attributes, Record, RecordKey, TenantId};
use crate::store::{RecordStore, StoreError};
use crate::write_path::{CreateOutcome, DeleteOutcome, RejectReason, WritePathController};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub tenant_id: String,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Create {
        student_id: String,
        #[serde(default)]
        attributes: Attributes,
    },
    /// One page of the tenant's records; resume with the previous `next_cursor`
    Enumerate {
        #[serde(default)]
        cursor: Option<String>,
        #[serde(default)]
        page_size: Option<usize>,
    },
    Delete {
        student_id: String,
    },
    Get {
        student_id: String,
    },
}

impl Request {
    pub fn create(tenant_id: &str, student_id: &str, attributes: Attributes) -> Self {
        Request {
            tenant_id: tenant_id.to_string(),
            operation: Operation::Create {
                student_id: student_id.to_string(),
                attributes,
            },
        }
    }

    pub fn enumerate(tenant_id: &str, cursor: Option<String>, page_size: Option<usize>) -> Self {
        Request {
            tenant_id: tenant_id.to_string(),
            operation: Operation::Enumerate { cursor, page_size },
        }
    }

    pub fn delete(tenant_id: &str, student_id: &str) -> Self {
        Request {
            tenant_id: tenant_id.to_string(),
            operation: Operation::Delete {
                student_id: student_id.to_string(),
            },
        }
    }

    pub fn get(tenant_id: &str, student_id: &str) -> Self {
        Request {
            tenant_id: tenant_id.to_string(),
            operation: Operation::Get {
                student_id: student_id.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Created(Record),
    Found(Record),
    Page {
        items: Vec<Record>,
        next_cursor: Option<String>,
    },
    Deleted(Record),
    NotFound,
    Rejected(RejectReason),
    /// Store stayed unreachable; the caller may try again later
    Unavailable,
}

impl Response {
    fn from_store_error(err: StoreError) -> Self {
        match RejectReason::from(err) {
            RejectReason::StoreUnavailable => Response::Unavailable,
            reason => Response::Rejected(reason),
        }
    }

    fn rejected(reason: RejectReason) -> Self {
        match reason {
            RejectReason::StoreUnavailable => Response::Unavailable,
            reason => Response::Rejected(reason),
        }
    }
}

pub struct DirectoryService<S: RecordStore> {
    writer: WritePathController<S>,
    default_page_size: usize,
}

impl<S: RecordStore> DirectoryService<S> {
    pub fn new(writer: WritePathController<S>, default_page_size: usize) -> Self {
        debug_assert!(default_page_size > 0, "Precondition: page size must be positive");
        DirectoryService {
            writer,
            default_page_size: default_page_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.writer.store()
    }

    pub async fn handle(&self, request: Request) -> Response {
        let tenant = request.tenant_id;
        let response = match request.operation {
            Operation::Create {
                student_id,
                attributes,
            } => match self.writer.create_record(&tenant, &student_id, attributes).await {
                CreateOutcome::Created(record) => Response::Created(record),
                CreateOutcome::Rejected(reason) => Response::rejected(reason),
            },
            Operation::Delete { student_id } => {
                match self.writer.delete_record(&tenant, &student_id).await {
                    DeleteOutcome::Deleted(record) => Response::Deleted(record),
                    DeleteOutcome::NotFound => Response::NotFound,
                    DeleteOutcome::Rejected(reason) => Response::rejected(reason),
                }
            }
            Operation::Get { student_id } => self.get(&tenant, &student_id).await,
            Operation::Enumerate { cursor, page_size } => {
                self.enumerate(&tenant, cursor.as_deref(), page_size).await
            }
        };

        debug!(tenant = %tenant, response = response_kind(&response), "handled request");
        response
    }

    async fn get(&self, tenant: &str, student: &str) -> Response {
        let key = match RecordKey::parse(tenant, student) {
            Ok(key) => key,
            Err(err) => return Response::Rejected(err.into()),
        };
        match self.store().get(&key).await {
            Ok(Some(record)) => Response::Found(record),
            Ok(None) => Response::NotFound,
            Err(err) => Response::from_store_error(err),
        }
    }

    async fn enumerate(&self, tenant: &str, cursor: Option<&str>, page_size: Option<usize>) -> Response {
        let tenant_id = match TenantId::parse(tenant) {
            Ok(tenant_id) => tenant_id,
            Err(err) => return Response::Rejected(err.into()),
        };
        let page_size = page_size.unwrap_or(self.default_page_size).max(1);

        match self.store().scan_page(&tenant_id, cursor, page_size).await {
            Ok(page) => Response::Page {
                items: page.items,
                next_cursor: page.next_cursor,
            },
            Err(err) => Response::from_store_error(err),
        }
    }
}

/// Short name of a response variant, for logs
pub fn response_kind(response: &Response) -> &'static str {
    match response {
        Response::Created(_) => "created",
        Response::Found(_) => "found",
        Response::Page { .. } => "page",
        Response::Deleted(_) => "deleted",
        Response::NotFound => "not_found",
        Response::Rejected(_) => "rejected",
        Response::Unavailable => "unavailable",
    }
}
