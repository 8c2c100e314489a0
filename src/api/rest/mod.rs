use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::services::errors::ServiceError;

pub mod budget;
pub mod health;
pub mod intake;
pub mod reference;
pub mod sync;

pub type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/sync/reference", post(sync::sync_reference))
        .route("/sync/runs", get(sync::recent_runs))
        .route("/reference/:kind", get(reference::list_records))
        .route("/intake/:kind", post(intake::push_sheet))
        .route("/budget/reconcile", post(budget::reconcile))
}

pub(crate) fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}

pub(crate) fn parse_path<T: std::str::FromStr<Err = String>>(
    raw: &str,
) -> Result<T, (StatusCode, Json<serde_json::Value>)> {
    raw.parse::<T>()
        .map_err(|err| to_response(ServiceError::Validation(err)))
}
