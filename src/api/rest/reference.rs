use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::Deserialize;

use crate::{
    domain::{environment::Environment, reference::ReferenceKind},
    infrastructure::{auth::AuthenticatedOperator, state::AppState},
    services::errors::ServiceError,
};

use super::{parse_path, to_response, ApiResult};

const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Lists cached rows of one reference list.
pub async fn list_records(
    Extension(state): Extension<Arc<AppState>>,
    _operator: AuthenticatedOperator,
    Path(kind): Path<String>,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult {
    let kind: ReferenceKind = parse_path(&kind)?;
    let env = query.environment.unwrap_or(Environment::Sandbox);
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_LIMIT);
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let references = &state.stores.references;
    let records = references
        .list(kind, env, search, limit)
        .await
        .map_err(|err| to_response(ServiceError::from(err)))?;
    let total = references
        .count(kind, env)
        .await
        .map_err(|err| to_response(ServiceError::from(err)))?;
    Ok(Json(serde_json::json!({
        "kind": kind,
        "environment": env,
        "total": total,
        "records": records,
    })))
}
