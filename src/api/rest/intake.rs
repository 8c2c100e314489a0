use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Deserialize;

use crate::{
    domain::{environment::Environment, intake::IntakeKind},
    infrastructure::{auth::AuthenticatedOperator, state::AppState},
    services::intake::IntakeService,
};

use super::{parse_path, to_response, ApiResult};

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub environment: Environment,
}

pub async fn push_sheet(
    Extension(state): Extension<Arc<AppState>>,
    _operator: AuthenticatedOperator,
    Path(kind): Path<String>,
    Json(payload): Json<PushRequest>,
) -> ApiResult {
    let kind: IntakeKind = parse_path(&kind)?;
    let service = IntakeService::new(state);
    let summary = service
        .push(kind, payload.environment)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}
