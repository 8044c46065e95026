//! HTTP transport
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `POST /tenants/:tenant/students` | create |
//! | `GET /tenants/:tenant/students?cursor=&limit=` | one enumeration page |
//! | `GET /tenants/:tenant/students/:student` | get |
//! | `DELETE /tenants/:tenant/students/:student` | delete |
//! | `POST /requests` | raw `Request` envelope |
//! | `GET /health` | liveness |

use crate::record::Attributes;
use crate::service::{DirectoryService, Request, Response};
use crate::store::RecordStore;
use crate::write_path::RejectReason;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateStudentBody {
    pub student_id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

pub fn router<S: RecordStore>(service: Arc<DirectoryService<S>>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/requests", post(handle_envelope::<S>))
        .route(
            "/tenants/:tenant/students",
            post(create_student::<S>).get(list_students::<S>),
        )
        .route(
            "/tenants/:tenant/students/:student",
            get(get_student::<S>).delete(delete_student::<S>),
        )
        .layer(Extension(service))
}

pub fn status_code(response: &Response) -> StatusCode {
    match response {
        Response::Created(_) => StatusCode::CREATED,
        Response::Found(_) | Response::Page { .. } | Response::Deleted(_) => StatusCode::OK,
        Response::NotFound => StatusCode::NOT_FOUND,
        Response::Rejected(RejectReason::DuplicateId) => StatusCode::CONFLICT,
        Response::Rejected(RejectReason::StoreUnavailable) | Response::Unavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Response::Rejected(_) => StatusCode::BAD_REQUEST,
    }
}

fn body(response: &Response) -> Value {
    match response {
        Response::Created(record) => json!({ "status": "created", "record": record }),
        Response::Found(record) => json!({ "status": "found", "record": record }),
        Response::Page { items, next_cursor } => {
            json!({ "status": "page", "items": items, "next_cursor": next_cursor })
        }
        Response::Deleted(record) => json!({ "status": "deleted", "record": record }),
        Response::NotFound => json!({ "status": "not_found" }),
        Response::Rejected(reason) => json!({
            "status": "rejected",
            "error": reason.code(),
            "message": reason.to_string(),
        }),
        Response::Unavailable => json!({ "status": "unavailable" }),
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        (status_code(&self), Json(body(&self))).into_response()
    }
}

async fn health<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
) -> Json<Value> {
    Json(json!({ "status": "ok", "region": service.store().region() }))
}

async fn handle_envelope<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
    Json(request): Json<Request>,
) -> Response {
    service.handle(request).await
}

async fn create_student<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
    Path(tenant): Path<String>,
    Json(body): Json<CreateStudentBody>,
) -> Response {
    service
        .handle(Request::create(&tenant, &body.student_id, body.attributes))
        .await
}

async fn list_students<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
    Path(tenant): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    service
        .handle(Request::enumerate(&tenant, query.cursor, query.limit))
        .await
}

async fn get_student<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
    Path((tenant, student)): Path<(String, String)>,
) -> Response {
    service.handle(Request::get(&tenant, &student)).await
}

async fn delete_student<S: RecordStore>(
    Extension(service): Extension<Arc<DirectoryService<S>>>,
    Path((tenant, student)): Path<(String, String)>,
) -> Response {
    service.handle(Request::delete(&tenant, &student)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::CursorError;
    use crate::record::ValidationError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_code(&Response::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_code(&Response::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_code(&Response::Rejected(RejectReason::DuplicateId)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_code(&Response::Rejected(RejectReason::InvalidCursor(CursorError::Stale))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&Response::Rejected(RejectReason::ValidationFailed(
                ValidationError::MissingField("name".into())
            ))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_rejection_body() {
        let value = body(&Response::Rejected(RejectReason::DuplicateId));
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["error"], "duplicate_id");
    }
}
