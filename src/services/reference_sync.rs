use std::{collections::HashSet, sync::Arc};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    domain::{
        environment::Environment,
        models::{RunCounts, RunStatus},
        reference::{ReferenceKind, ReferenceRecord},
    },
    infrastructure::{netsuite::NetSuiteClient, state::AppState},
};

use super::errors::ServiceError;

const UPSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub kind: ReferenceKind,
    pub environment: Environment,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub error: Option<String>,
}

impl SyncSummary {
    fn failed(kind: ReferenceKind, environment: Environment, error: String) -> Self {
        Self {
            kind,
            environment,
            status: RunStatus::Failed,
            counts: RunCounts::default(),
            error: Some(error),
        }
    }
}

pub struct ReferenceSyncService {
    pub state: Arc<AppState>,
}

impl ReferenceSyncService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Refreshes one reference list of one account and records the run.
    pub async fn sync(
        &self,
        kind: ReferenceKind,
        env: Environment,
    ) -> Result<SyncSummary, ServiceError> {
        let client = self.state.netsuite(env)?;
        let runs = &self.state.stores.runs;
        let run = runs.start(kind.as_str(), env).await?;

        let outcome = self.fetch_and_store(&client, kind, env).await;
        match &outcome {
            Ok(counts) => {
                runs.finish(run.id, RunStatus::Succeeded, counts, None).await?;
                info!(%kind, environment = %env, fetched = counts.fetched, upserted = counts.upserted,
                    deactivated = counts.deactivated, skipped = counts.skipped, "reference sync finished");
            }
            Err(err) => {
                let message = err.to_string();
                runs.finish(run.id, RunStatus::Failed, &RunCounts::default(), Some(&message))
                    .await?;
                warn!(%kind, environment = %env, error = %message, "reference sync failed");
            }
        }

        outcome.map(|counts| SyncSummary {
            kind,
            environment: env,
            status: RunStatus::Succeeded,
            counts,
            error: None,
        })
    }

    /// Syncs every list in dependency order. A failing list does not stop the
    /// others; it shows up as a failed summary.
    pub async fn sync_all(&self, env: Environment) -> Result<Vec<SyncSummary>, ServiceError> {
        self.state.netsuite(env)?;
        let mut summaries = Vec::with_capacity(ReferenceKind::ALL.len());
        for kind in ReferenceKind::ALL {
            match self.sync(kind, env).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => summaries.push(SyncSummary::failed(kind, env, err.to_string())),
            }
        }
        Ok(summaries)
    }

    async fn fetch_and_store(
        &self,
        client: &NetSuiteClient,
        kind: ReferenceKind,
        env: Environment,
    ) -> Result<RunCounts, ServiceError> {
        let rows = client
            .fetch_all(kind, self.state.config.netsuite.page_size)
            .await?;
        let mut counts = RunCounts {
            fetched: rows.len() as i64,
            ..RunCounts::default()
        };

        let mut seen = HashSet::with_capacity(rows.len());
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match ReferenceRecord::from_suiteql_row(kind, env, row) {
                Ok(record) if seen.insert(record.internal_id.clone()) => records.push(record),
                Ok(record) => {
                    warn!(%kind, id = %record.internal_id, "duplicate id in suiteql result");
                    counts.skipped += 1;
                }
                Err(err) => {
                    warn!(%kind, error = %err, "skipping unmappable row");
                    counts.skipped += 1;
                }
            }
        }

        let references = &self.state.stores.references;
        for chunk in records.chunks(UPSERT_CHUNK) {
            counts.upserted += references.upsert(chunk).await? as i64;
        }

        // An empty result never deactivates the cached list.
        if seen.is_empty() {
            warn!(%kind, environment = %env, "no rows returned, leaving cache untouched");
        } else {
            counts.deactivated = references.mark_missing_inactive(kind, env, &seen).await? as i64;
        }
        Ok(counts)
    }
}
