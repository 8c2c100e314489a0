use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::domain::{environment::Environment, reference::ReferenceKind};

use super::{
    config::NetSuiteAccountConfig,
    http::{ensure_success, IntegrationError},
    oauth::{AccessTokenSource, OAuthTokenProvider},
};

const SERVICE: &str = "netsuite";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteQlPage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total_results: Option<u64>,
}

/// REST client for one NetSuite account (sandbox or production).
pub struct NetSuiteClient {
    environment: Environment,
    http: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl NetSuiteClient {
    pub fn new(
        environment: Environment,
        http: Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            environment,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_config(
        environment: Environment,
        http: Client,
        account: &NetSuiteAccountConfig,
    ) -> Result<Self, IntegrationError> {
        let tokens = OAuthTokenProvider::for_netsuite(http.clone(), account)?;
        Ok(Self::new(
            environment,
            http,
            account.base_url(),
            Arc::new(tokens),
        ))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub async fn suiteql(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SuiteQlPage, IntegrationError> {
        let url = format!("{}/services/rest/query/v1/suiteql", self.base_url);
        debug!(environment = %self.environment, %query, limit, offset, "running suiteql");
        let response = self
            .execute(|http| {
                http.post(&url)
                    .query(&[("limit", limit), ("offset", offset)])
                    .header("Prefer", "transient")
                    .json(&json!({ "q": query }))
            })
            .await?;
        response
            .json::<SuiteQlPage>()
            .await
            .map_err(|err| IntegrationError::Decode(err.to_string()))
    }

    /// Reads a whole list with keyset pagination on the id column. Offsets are
    /// never used, so rows added mid-sync cannot shift pages.
    pub async fn fetch_all(
        &self,
        kind: ReferenceKind,
        page_size: u32,
    ) -> Result<Vec<Value>, IntegrationError> {
        let page_size = page_size.clamp(1, 1000);
        let mut cursor: Option<String> = None;
        let mut rows = Vec::new();

        loop {
            let query = keyset_query(kind, cursor.as_deref())?;
            let page = self.suiteql(&query, page_size, 0).await?;
            let count = page.items.len();
            let last_id = page
                .items
                .last()
                .and_then(|row| key_text(row, kind.key_column()));
            rows.extend(page.items);

            if count == 0 || (count < page_size as usize && !page.has_more) {
                break;
            }
            // A page that cannot move the cursor fails the whole fetch; callers
            // never see a partial list.
            match last_id {
                Some(id) if cursor.as_deref() != Some(id.as_str()) => cursor = Some(id),
                Some(id) => {
                    warn!(%kind, environment = %self.environment, %id, "suiteql cursor did not advance");
                    return Err(IntegrationError::Decode(format!(
                        "{kind} cursor did not advance past id {id}"
                    )));
                }
                None => {
                    warn!(%kind, environment = %self.environment, "suiteql page ended with a row without id");
                    return Err(IntegrationError::Decode(format!(
                        "{kind} page ended with a row without {}",
                        kind.key_column()
                    )));
                }
            }
        }

        info!(%kind, environment = %self.environment, rows = rows.len(), "fetched reference list");
        Ok(rows)
    }

    /// Creates a record and returns its internal id, read from the `Location`
    /// header of the 204 response.
    pub async fn create_record(
        &self,
        record_type: &str,
        body: &Value,
    ) -> Result<String, IntegrationError> {
        let url = format!("{}/services/rest/record/v1/{}", self.base_url, record_type);
        let response = self.execute(|http| http.post(&url).json(body)).await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| IntegrationError::Decode("missing Location header".to_string()))?;
        let id = record_id_from_location(location)
            .ok_or_else(|| IntegrationError::Decode(format!("unexpected Location {location}")))?;
        info!(environment = %self.environment, record_type, id = %id, "netsuite record created");
        Ok(id)
    }

    pub async fn update_record(
        &self,
        record_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), IntegrationError> {
        let url = format!(
            "{}/services/rest/record/v1/{}/{}",
            self.base_url, record_type, id
        );
        self.execute(|http| http.patch(&url).json(body)).await?;
        info!(environment = %self.environment, record_type, id, "netsuite record updated");
        Ok(())
    }

    // A 401 usually means the cached token was revoked early; retry once with a
    // fresh one.
    async fn execute<F>(&self, build: F) -> Result<Response, IntegrationError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        match ensure_success(SERVICE, response).await {
            Err(err) if err.is_unauthorized() => {
                warn!(environment = %self.environment, "netsuite rejected token, refreshing");
                self.tokens.invalidate();
                let token = self.tokens.access_token().await?;
                let response = build(&self.http).bearer_auth(&token).send().await?;
                ensure_success(SERVICE, response).await
            }
            other => other,
        }
    }
}

/// `SELECT … FROM <table> [WHERE id > <cursor>] ORDER BY id`.
pub fn keyset_query(kind: ReferenceKind, after: Option<&str>) -> Result<String, IntegrationError> {
    let key = kind.key_column();
    let mut query = format!(
        "SELECT {} FROM {}",
        kind.suiteql_columns().join(", "),
        kind.suiteql_table()
    );
    if let Some(cursor) = after {
        let literal = if kind.numeric_key() {
            if cursor.is_empty() || !cursor.chars().all(|c| c.is_ascii_digit()) {
                return Err(IntegrationError::Decode(format!(
                    "non-numeric {kind} id {cursor}"
                )));
            }
            cursor.to_string()
        } else {
            format!("'{}'", cursor.replace('\'', "''"))
        };
        query.push_str(&format!(" WHERE {key} > {literal}"));
    }
    query.push_str(&format!(" ORDER BY {key}"));
    Ok(query)
}

fn key_text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn record_id_from_location(location: &str) -> Option<String> {
    let id = location.trim_end_matches('/').rsplit('/').next()?;
    let id = id.split('?').next().unwrap_or(id);
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_has_no_cursor() {
        let query = keyset_query(ReferenceKind::Currency, None).unwrap();
        assert_eq!(query, "SELECT id, symbol, name, isinactive FROM currency ORDER BY id");
    }

    #[test]
    fn numeric_cursor_is_validated() {
        let query = keyset_query(ReferenceKind::Department, Some("42")).unwrap();
        assert!(query.ends_with("FROM department WHERE id > 42 ORDER BY id"));
        assert!(keyset_query(ReferenceKind::Department, Some("42 OR 1=1")).is_err());
    }

    #[test]
    fn text_cursor_is_quoted() {
        let query = keyset_query(ReferenceKind::Country, Some("C'I")).unwrap();
        assert_eq!(
            query,
            "SELECT id, name FROM country WHERE id > 'C''I' ORDER BY id"
        );
    }

    #[test]
    fn reads_id_from_location() {
        assert_eq!(
            record_id_from_location(
                "https://123.suitetalk.api.netsuite.com/services/rest/record/v1/purchaseOrder/5521"
            ),
            Some("5521".to_string())
        );
        assert_eq!(record_id_from_location(""), None);
    }
}
