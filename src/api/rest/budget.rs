use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::Deserialize;

use crate::{
    domain::environment::Environment,
    infrastructure::{auth::AuthenticatedOperator, state::AppState},
    services::budget::BudgetService,
};

use super::{to_response, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub environment: Environment,
}

pub async fn reconcile(
    Extension(state): Extension<Arc<AppState>>,
    _operator: AuthenticatedOperator,
    Json(payload): Json<ReconcileRequest>,
) -> ApiResult {
    let service = BudgetService::new(state);
    let summary = service
        .reconcile(payload.environment)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}
