use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde_json::json;

use crate::{domain::environment::Environment, infrastructure::state::AppState};

pub async fn healthcheck(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let netsuite: Vec<Environment> = Environment::ALL
        .into_iter()
        .filter(|env| state.netsuite(*env).is_ok())
        .collect();
    Json(json!({
        "status": "ok",
        "netsuite": netsuite,
        "sheets": state.sheets().is_ok(),
        "kissflow": state.kissflow().is_ok(),
    }))
}
