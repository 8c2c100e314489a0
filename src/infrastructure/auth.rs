use std::sync::Arc;

use axum::{
    async_trait, extract::FromRequestParts, http::request::Parts, response::IntoResponse, Json,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::infrastructure::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("invalid authorization token")]
    Invalid,
    #[error("api token is not configured")]
    Disabled,
    #[error("missing application state")]
    MissingState,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            AuthError::Disabled | AuthError::MissingState => {
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            }
            _ => axum::http::StatusCode::UNAUTHORIZED,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A caller holding the operator API token.
#[derive(Clone, Debug)]
pub struct AuthenticatedOperator;

#[async_trait]
impl FromRequestParts<()> for AuthenticatedOperator {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &()) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<Arc<AppState>>() else {
            return Err(AuthError::MissingState);
        };
        let expected = state.config.auth.api_token.as_bytes();
        if expected.is_empty() {
            return Err(AuthError::Disabled);
        }

        let Some(header_value) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Err(AuthError::Missing);
        };
        let header_str = header_value.to_str().map_err(|_| AuthError::Invalid)?;
        let token = header_str
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Invalid)?
            .trim();

        if bool::from(token.as_bytes().ct_eq(expected)) {
            Ok(AuthenticatedOperator)
        } else {
            warn!("rejected request with wrong api token");
            Err(AuthError::Invalid)
        }
    }
}
