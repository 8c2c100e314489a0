use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    config::KissflowConfig,
    http::{ensure_success, IntegrationError},
};

const SERVICE: &str = "kissflow";

#[derive(Debug, Deserialize)]
struct DatasetPage {
    #[serde(rename = "Data", default)]
    data: Vec<Value>,
}

pub struct KissflowClient {
    http: Client,
    base_url: String,
    account_id: String,
    access_key_id: String,
    access_key_secret: String,
    page_size: u32,
}

impl KissflowClient {
    pub fn new(http: Client, config: &KissflowConfig) -> Self {
        Self {
            http,
            base_url: config.base_url(),
            account_id: config.account_id.clone(),
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
            page_size: config.page_size.max(1),
        }
    }

    fn dataset_url(&self, dataset_id: &str) -> String {
        format!(
            "{}/dataset/2/{}/{}",
            self.base_url, self.account_id, dataset_id
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Access-Key-Id", &self.access_key_id)
            .header("X-Access-Key-Secret", &self.access_key_secret)
    }

    /// Every row of a dataset, following `page_number` until a short page.
    pub async fn list_rows(&self, dataset_id: &str) -> Result<Vec<Value>, IntegrationError> {
        let url = format!("{}/list", self.dataset_url(dataset_id));
        let mut rows = Vec::new();
        let mut page_number: u32 = 1;

        loop {
            debug!(dataset_id, page_number, "listing kissflow dataset page");
            let response = self
                .authorized(self.http.get(&url))
                .query(&[("page_number", page_number), ("page_size", self.page_size)])
                .send()
                .await?;
            let page: DatasetPage = ensure_success(SERVICE, response)
                .await?
                .json()
                .await
                .map_err(|err| IntegrationError::Decode(err.to_string()))?;
            let count = page.data.len();
            rows.extend(page.data);
            if count < self.page_size as usize {
                break;
            }
            page_number += 1;
        }

        info!(dataset_id, rows = rows.len(), "kissflow dataset listed");
        Ok(rows)
    }

    /// Returns the `_id` Kissflow assigned, when it reports one.
    pub async fn create_row<T: Serialize + ?Sized>(
        &self,
        dataset_id: &str,
        fields: &T,
    ) -> Result<Option<String>, IntegrationError> {
        let url = format!("{}/", self.dataset_url(dataset_id));
        let response = self
            .authorized(self.http.post(&url))
            .json(fields)
            .send()
            .await?;
        let body: Value = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .unwrap_or(Value::Null);
        Ok(body
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub async fn update_row<T: Serialize + ?Sized>(
        &self,
        dataset_id: &str,
        row_id: &str,
        fields: &T,
    ) -> Result<(), IntegrationError> {
        let url = format!("{}/{}", self.dataset_url(dataset_id), row_id);
        let response = self
            .authorized(self.http.patch(&url))
            .json(fields)
            .send()
            .await?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}
