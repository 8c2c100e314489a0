use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::intake::SheetTable;

use super::{
    config::SheetsConfig,
    http::{ensure_success, IntegrationError},
    oauth::{AccessTokenSource, OAuthTokenProvider},
};

const SERVICE: &str = "google_sheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A single-cell write, addressed by sheet row and column index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub sheet: String,
    pub row_number: u32,
    pub column: usize,
    pub value: String,
}

impl CellUpdate {
    pub fn a1_range(&self) -> String {
        format!(
            "{}!{}{}",
            quote_sheet(&self.sheet),
            column_letter(self.column),
            self.row_number
        )
    }
}

pub struct SheetsClient {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl SheetsClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        }
    }

    pub fn from_config(http: Client, config: &SheetsConfig) -> Result<Self, IntegrationError> {
        let tokens = OAuthTokenProvider::for_google(http.clone(), config)?;
        Ok(Self::new(
            http,
            &config.api_base_url,
            &config.spreadsheet_id,
            Arc::new(tokens),
        ))
    }

    /// Reads a range such as `Purchase Orders!A1:Z`; its first row is the header.
    pub async fn read_table(&self, range: &str) -> Result<SheetTable, IntegrationError> {
        let mut url = self.spreadsheet_url()?;
        url.path_segments_mut()
            .map_err(|_| IntegrationError::Config("invalid sheets base url".into()))?
            .push("values")
            .push(range);
        let token = self.tokens.access_token().await?;
        debug!(range, "reading sheet range");
        let response = self
            .http
            .get(url)
            .query(&[("majorDimension", "ROWS")])
            .bearer_auth(token)
            .send()
            .await?;
        let body: ValueRange = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| IntegrationError::Decode(err.to_string()))?;

        let returned = body.range.as_deref().unwrap_or(range);
        let (sheet, first_row) = split_range(returned);
        let values = body
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        Ok(SheetTable::new(sheet, first_row, values))
    }

    pub async fn write_cells(&self, updates: &[CellUpdate]) -> Result<(), IntegrationError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut url = self.spreadsheet_url()?;
        url.path_segments_mut()
            .map_err(|_| IntegrationError::Config("invalid sheets base url".into()))?
            .push("values:batchUpdate");
        let data: Vec<Value> = updates
            .iter()
            .map(|update| json!({ "range": update.a1_range(), "values": [[update.value]] }))
            .collect();
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "valueInputOption": "RAW", "data": data }))
            .send()
            .await?;
        ensure_success(SERVICE, response).await?;
        info!(cells = updates.len(), "sheet statuses written");
        Ok(())
    }

    fn spreadsheet_url(&self) -> Result<url::Url, IntegrationError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|err| IntegrationError::Config(format!("sheets base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| IntegrationError::Config("invalid sheets base url".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()]);
        Ok(url)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 0 → A, 25 → Z, 26 → AA.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Splits `'Vendor Bills'!A3:Z100` into the sheet name and the first row (3).
/// A range without a row number starts at row 1.
pub fn split_range(range: &str) -> (String, u32) {
    let (sheet, cells) = match range.rsplit_once('!') {
        Some((sheet, cells)) => (sheet, cells),
        None => (range, ""),
    };
    let sheet = sheet
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| s.replace("''", "'"))
        .unwrap_or_else(|| sheet.to_string());
    let start = cells.split(':').next().unwrap_or("");
    let row = start
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse::<u32>()
        .unwrap_or(1);
    (sheet, row)
}

fn quote_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}
