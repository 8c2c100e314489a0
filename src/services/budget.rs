use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    domain::{
        budget::{plan_reconciliation, BudgetTransaction},
        environment::Environment,
    },
    infrastructure::state::AppState,
};

use super::errors::ServiceError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub orphaned: usize,
    pub failed: usize,
}

pub struct BudgetService {
    pub state: Arc<AppState>,
}

impl BudgetService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Brings the Kissflow budget dataset in line with the transactions pushed to
    /// one NetSuite account. Rows of the other environment are left alone.
    pub async fn reconcile(&self, env: Environment) -> Result<ReconcileSummary, ServiceError> {
        let kissflow = self.state.kissflow()?;
        let dataset = self.state.config.kissflow.budget_dataset_id.as_str();

        let desired: Vec<BudgetTransaction> = self
            .state
            .stores
            .ledger
            .synced(env)
            .await?
            .iter()
            .filter_map(|entry| entry.budget_transaction())
            .collect();
        let existing: Vec<_> = kissflow
            .list_rows(dataset)
            .await?
            .iter()
            .filter_map(BudgetTransaction::from_kissflow_row)
            .filter(|row| row.transaction.environment == env)
            .collect();

        let plan = plan_reconciliation(&existing, &desired);
        let mut summary = ReconcileSummary {
            unchanged: plan.unchanged,
            orphaned: plan.orphans.len(),
            ..ReconcileSummary::default()
        };

        for transaction in &plan.creates {
            match kissflow
                .create_row(dataset, &transaction.to_kissflow_fields())
                .await
            {
                Ok(_) => summary.created += 1,
                Err(err) => {
                    warn!(reference = %transaction.reference, error = %err, "kissflow create failed");
                    summary.failed += 1;
                }
            }
        }
        for (row_id, transaction) in &plan.updates {
            match kissflow
                .update_row(dataset, row_id, &transaction.to_kissflow_fields())
                .await
            {
                Ok(()) => summary.updated += 1,
                Err(err) => {
                    warn!(reference = %transaction.reference, row_id, error = %err, "kissflow update failed");
                    summary.failed += 1;
                }
            }
        }
        if !plan.orphans.is_empty() {
            warn!(environment = %env, rows = ?plan.orphans, "kissflow rows without a pushed transaction");
        }

        info!(environment = %env, created = summary.created, updated = summary.updated,
            unchanged = summary.unchanged, orphaned = summary.orphaned, failed = summary.failed,
            "budget reconciliation finished");
        Ok(summary)
    }
}
