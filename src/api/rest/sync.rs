use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    Json,
};
use serde::Deserialize;

use crate::{
    domain::{environment::Environment, reference::ReferenceKind},
    infrastructure::{auth::AuthenticatedOperator, state::AppState},
    services::reference_sync::ReferenceSyncService,
};

use super::{to_response, ApiResult};

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub environment: Environment,
    #[serde(default)]
    pub kind: Option<ReferenceKind>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn sync_reference(
    Extension(state): Extension<Arc<AppState>>,
    _operator: AuthenticatedOperator,
    Json(payload): Json<SyncRequest>,
) -> ApiResult {
    let service = ReferenceSyncService::new(state);
    let summaries = match payload.kind {
        Some(kind) => vec![service
            .sync(kind, payload.environment)
            .await
            .map_err(to_response)?],
        None => service
            .sync_all(payload.environment)
            .await
            .map_err(to_response)?,
    };
    Ok(Json(serde_json::json!({ "summaries": summaries })))
}

pub async fn recent_runs(
    Extension(state): Extension<Arc<AppState>>,
    _operator: AuthenticatedOperator,
    Query(query): Query<RunsQuery>,
) -> ApiResult {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = state
        .stores
        .runs
        .recent(limit)
        .await
        .map_err(|err| to_response(err.into()))?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}
