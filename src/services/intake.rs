use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        environment::Environment,
        intake::{group_documents, IntakeDocument, IntakeKind, IntakePayload, COL_STATUS, SYNCED_PREFIX},
        models::{LedgerEntry, PushStatus},
        reference::{ReferenceKind, ReferenceRecord},
    },
    infrastructure::{netsuite::NetSuiteClient, sheets::CellUpdate, state::AppState},
};

use super::{
    errors::ServiceError,
    transactions::{BuiltRecord, TransactionBuilder},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pushed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub reference: Option<String>,
    pub rows: Vec<u32>,
    pub status: DocumentStatus,
    pub netsuite_id: Option<String>,
    pub message: Option<String>,
}

impl DocumentOutcome {
    /// Text written into the sheet's status column.
    pub fn status_text(&self) -> String {
        match (&self.status, &self.netsuite_id) {
            (DocumentStatus::Failed, _) => format!(
                "Error: {}",
                self.message.as_deref().unwrap_or("unknown error")
            ),
            (_, Some(id)) => format!("{SYNCED_PREFIX} {id}"),
            (_, None) => SYNCED_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntakeSummary {
    pub kind: IntakeKind,
    pub environment: Environment,
    pub pushed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub documents: Vec<DocumentOutcome>,
}

impl IntakeSummary {
    fn new(kind: IntakeKind, environment: Environment) -> Self {
        Self {
            kind,
            environment,
            pushed: 0,
            skipped: 0,
            failed: 0,
            documents: Vec::new(),
        }
    }

    fn add(&mut self, outcome: DocumentOutcome) {
        match outcome.status {
            DocumentStatus::Pushed => self.pushed += 1,
            DocumentStatus::Skipped => self.skipped += 1,
            DocumentStatus::Failed => self.failed += 1,
        }
        self.documents.push(outcome);
    }
}

pub struct IntakeService {
    pub state: Arc<AppState>,
}

impl IntakeService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Pushes every unsynced document of one sheet into NetSuite and writes the
    /// outcome back next to the rows.
    pub async fn push(
        &self,
        kind: IntakeKind,
        env: Environment,
    ) -> Result<IntakeSummary, ServiceError> {
        let sheets = self.state.sheets()?;
        let netsuite = self.state.netsuite(env)?;
        let range = self.state.config.sheets.range_for(kind);
        let lock = self.state.intake_lock(kind, env);
        let _running = lock.lock().await;

        let table = sheets.read_table(range).await?;
        let status_column = table.column(COL_STATUS).ok_or_else(|| {
            ServiceError::Validation(format!("sheet range {range} has no Status column"))
        })?;

        let builder = TransactionBuilder::new(self.state.stores.references.clone(), env);
        let mut summary = IntakeSummary::new(kind, env);
        for parsed in group_documents(kind, &table) {
            let outcome = match parsed {
                Ok(document) => self.push_document(&netsuite, &builder, env, &document).await?,
                Err(err) => {
                    if let Some(reference) = &err.reference {
                        self.record_failure(kind, env, reference, &err.message).await?;
                    }
                    DocumentOutcome {
                        reference: err.reference,
                        rows: err.row_numbers,
                        status: DocumentStatus::Failed,
                        netsuite_id: None,
                        message: Some(err.message),
                    }
                }
            };
            summary.add(outcome);
        }

        let mut updates = Vec::new();
        for outcome in &summary.documents {
            let text = outcome.status_text();
            for row in &outcome.rows {
                updates.push(CellUpdate {
                    sheet: table.sheet.clone(),
                    row_number: *row,
                    column: status_column,
                    value: text.clone(),
                });
            }
        }
        sheets.write_cells(&updates).await?;

        info!(%kind, environment = %env, pushed = summary.pushed, skipped = summary.skipped,
            failed = summary.failed, "intake push finished");
        Ok(summary)
    }

    /// Runs every sheet, vendors first so new vendors are cached before the
    /// transactions that reference them.
    pub async fn push_all(&self, env: Environment) -> Vec<Result<IntakeSummary, ServiceError>> {
        let mut results = Vec::with_capacity(IntakeKind::ALL.len());
        for kind in IntakeKind::ALL {
            let result = self.push(kind, env).await;
            if let Err(err) = &result {
                warn!(%kind, environment = %env, error = %err, "intake push failed");
            }
            results.push(result);
        }
        results
    }

    async fn push_document(
        &self,
        netsuite: &NetSuiteClient,
        builder: &TransactionBuilder,
        env: Environment,
        document: &IntakeDocument,
    ) -> Result<DocumentOutcome, ServiceError> {
        let ledger = &self.state.stores.ledger;
        let previous = ledger.find(document.kind, env, &document.reference).await?;
        if let Some(entry) = previous.as_ref().filter(|entry| entry.is_synced()) {
            return Ok(DocumentOutcome {
                reference: Some(document.reference.clone()),
                rows: document.row_numbers.clone(),
                status: DocumentStatus::Skipped,
                netsuite_id: entry.netsuite_id.clone(),
                message: Some("already synced".to_string()),
            });
        }

        let built = match builder.build(document).await {
            Ok(built) => built,
            Err(err) => {
                warn!(kind = %document.kind, reference = %document.reference, error = %err, "document rejected");
                return self.failed(document, env, previous, err.to_string()).await;
            }
        };

        let sent = match &built.existing_id {
            Some(id) => netsuite
                .update_record(built.record_type, id, &built.body)
                .await
                .map(|_| id.clone()),
            None => netsuite.create_record(built.record_type, &built.body).await,
        };
        let netsuite_id = match sent {
            Ok(id) => id,
            Err(err) => {
                warn!(kind = %document.kind, reference = %document.reference, error = %err, "netsuite push failed");
                return self.failed(document, env, previous, err.to_string()).await;
            }
        };

        let entry = synced_entry(document, env, previous, &built, &netsuite_id);
        ledger.record(&entry).await?;

        if let IntakePayload::Vendor(vendor) = &document.payload {
            self.cache_vendor(env, &netsuite_id, &vendor.company_name, &built.body)
                .await?;
        }

        Ok(DocumentOutcome {
            reference: Some(document.reference.clone()),
            rows: document.row_numbers.clone(),
            status: DocumentStatus::Pushed,
            netsuite_id: Some(netsuite_id),
            message: None,
        })
    }

    async fn failed(
        &self,
        document: &IntakeDocument,
        env: Environment,
        previous: Option<LedgerEntry>,
        message: String,
    ) -> Result<DocumentOutcome, ServiceError> {
        let ledger = &self.state.stores.ledger;
        if let Some(current) = ledger
            .find(document.kind, env, &document.reference)
            .await?
            .filter(LedgerEntry::is_synced)
        {
            warn!(kind = %document.kind, reference = %document.reference, error = %message,
                "push failed but the document is already synced");
            return Ok(DocumentOutcome {
                reference: Some(document.reference.clone()),
                rows: document.row_numbers.clone(),
                status: DocumentStatus::Skipped,
                netsuite_id: current.netsuite_id,
                message: Some("already synced".to_string()),
            });
        }

        let mut entry = LedgerEntry {
            id: previous.map(|entry| entry.id).unwrap_or_else(Uuid::new_v4),
            kind: document.kind,
            environment: env,
            reference: document.reference.clone(),
            status: PushStatus::Failed,
            netsuite_id: None,
            message: Some(message.clone()),
            amount_cents: document.total_cents().unwrap_or(0),
            currency: None,
            department: None,
            account: None,
            transaction_date: None,
            pushed_at: Utc::now(),
        };
        if let IntakePayload::Transaction { header, .. } = &document.payload {
            entry.currency = header.currency.clone();
            entry.department = header.department.clone();
            entry.transaction_date = header.date;
        }
        ledger.record(&entry).await?;
        Ok(DocumentOutcome {
            reference: Some(document.reference.clone()),
            rows: document.row_numbers.clone(),
            status: DocumentStatus::Failed,
            netsuite_id: None,
            message: Some(message),
        })
    }

    async fn record_failure(
        &self,
        kind: IntakeKind,
        env: Environment,
        reference: &str,
        message: &str,
    ) -> Result<(), ServiceError> {
        let ledger = &self.state.stores.ledger;
        let previous = ledger.find(kind, env, reference).await?;
        if previous.as_ref().is_some_and(LedgerEntry::is_synced) {
            return Ok(());
        }
        ledger
            .record(&LedgerEntry {
                id: previous.map(|entry| entry.id).unwrap_or_else(Uuid::new_v4),
                kind,
                environment: env,
                reference: reference.to_string(),
                status: PushStatus::Failed,
                netsuite_id: None,
                message: Some(message.to_string()),
                amount_cents: 0,
                currency: None,
                department: None,
                account: None,
                transaction_date: None,
                pushed_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    // Makes a pushed vendor resolvable before the next reference sync. Fields the
    // cached row already has and the push did not send are kept.
    async fn cache_vendor(
        &self,
        env: Environment,
        internal_id: &str,
        company_name: &str,
        body: &Value,
    ) -> Result<(), ServiceError> {
        let references = &self.state.stores.references;
        let pushed = body
            .as_object()
            .into_iter()
            .flat_map(|fields| fields.iter())
            .filter(|(key, _)| key.starts_with("custentity_"));

        let mut record = match references.get(ReferenceKind::Vendor, env, internal_id).await? {
            Some(existing) => existing,
            None => ReferenceRecord {
                kind: ReferenceKind::Vendor,
                is_sandbox: env.is_sandbox(),
                internal_id: internal_id.to_string(),
                name: company_name.to_string(),
                code: None,
                is_inactive: false,
                attributes: Map::new(),
                synced_at: Utc::now(),
            },
        };
        for (key, value) in pushed {
            record.attributes.insert(key.clone(), value.clone());
        }
        record.name = company_name.to_string();
        record.is_inactive = false;
        record.synced_at = Utc::now();
        references.upsert(&[record]).await?;
        Ok(())
    }
}

fn synced_entry(
    document: &IntakeDocument,
    env: Environment,
    previous: Option<LedgerEntry>,
    built: &BuiltRecord,
    netsuite_id: &str,
) -> LedgerEntry {
    LedgerEntry {
        id: previous.map(|entry| entry.id).unwrap_or_else(Uuid::new_v4),
        kind: document.kind,
        environment: env,
        reference: document.reference.clone(),
        status: PushStatus::Synced,
        netsuite_id: Some(netsuite_id.to_string()),
        message: None,
        amount_cents: built.amount_cents,
        currency: built.currency.clone(),
        department: built.department.clone(),
        account: built.account.clone(),
        transaction_date: built.transaction_date,
        pushed_at: Utc::now(),
    }
}
