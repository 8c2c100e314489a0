use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use thiserror::Error;

/// Failure talking to NetSuite, Google or Kissflow.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("failed to sign assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("token endpoint error: {0}")]
    Token(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("missing configuration: {0}")]
    Config(String),
}

impl IntegrationError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            IntegrationError::Status {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        )
    }
}

pub fn build_client(timeout: Duration) -> Result<Client, IntegrationError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("finance_bridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(IntegrationError::from)
}

/// Passes successful responses through and turns the rest into
/// [`IntegrationError::Status`] with the response body attached.
pub async fn ensure_success(
    service: &'static str,
    response: Response,
) -> Result<Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IntegrationError::Status {
        service,
        status,
        body: truncate(body, 2_000),
    })
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut cut = max;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
