use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::environment::Environment;

/// A pushed NetSuite transaction as tracked against the Kissflow budget dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetTransaction {
    pub reference: String,
    pub transaction_type: String,
    pub budget_code: Option<String>,
    pub account: Option<String>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub netsuite_id: Option<String>,
    pub environment: Environment,
}

/// Field layout of the Kissflow budget dataset.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct KissflowBudgetFields<'a> {
    #[serde(rename = "Reference")]
    pub reference: &'a str,
    #[serde(rename = "Transaction_Type")]
    pub transaction_type: &'a str,
    #[serde(rename = "Budget_Code")]
    pub budget_code: Option<&'a str>,
    #[serde(rename = "GL_Account")]
    pub account: Option<&'a str>,
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "Currency")]
    pub currency: Option<&'a str>,
    #[serde(rename = "Transaction_Date")]
    pub transaction_date: Option<NaiveDate>,
    #[serde(rename = "NetSuite_ID")]
    pub netsuite_id: Option<&'a str>,
    #[serde(rename = "Environment")]
    pub environment: Environment,
}

impl BudgetTransaction {
    pub fn to_kissflow_fields(&self) -> KissflowBudgetFields<'_> {
        KissflowBudgetFields {
            reference: &self.reference,
            transaction_type: &self.transaction_type,
            budget_code: self.budget_code.as_deref(),
            account: self.account.as_deref(),
            amount: self.amount_cents as f64 / 100.0,
            currency: self.currency.as_deref(),
            transaction_date: self.transaction_date,
            netsuite_id: self.netsuite_id.as_deref(),
            environment: self.environment,
        }
    }

    /// Reads a Kissflow dataset row. Rows without an id, a reference or a known
    /// environment are not ours and yield `None`.
    pub fn from_kissflow_row(row: &Value) -> Option<ExistingBudgetRow> {
        let row_id = text(row, "_id")?;
        let reference = text(row, "Reference")?;
        let environment = text(row, "Environment")?.parse().ok()?;
        let amount_cents = match row.get("Amount") {
            Some(Value::Number(n)) => n.as_f64().map(|v| (v * 100.0).round() as i64),
            Some(Value::String(s)) => s
                .replace(',', "")
                .trim()
                .parse::<f64>()
                .ok()
                .map(|v| (v * 100.0).round() as i64),
            _ => None,
        }
        .unwrap_or(0);
        // Kissflow date fields may come back as full timestamps.
        let transaction_date = text(row, "Transaction_Date").and_then(|raw| {
            let date = raw.get(..10).unwrap_or(raw.as_str());
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
        });

        Some(ExistingBudgetRow {
            row_id,
            transaction: BudgetTransaction {
                reference,
                transaction_type: text(row, "Transaction_Type").unwrap_or_default(),
                budget_code: text(row, "Budget_Code"),
                account: text(row, "GL_Account"),
                amount_cents,
                currency: text(row, "Currency"),
                transaction_date,
                netsuite_id: text(row, "NetSuite_ID"),
                environment,
            },
        })
    }

    fn key(&self) -> BudgetKey {
        (
            self.transaction_type.clone(),
            self.reference.clone(),
            self.environment,
        )
    }

    fn differs_from(&self, other: &BudgetTransaction) -> bool {
        self.budget_code != other.budget_code
            || self.account != other.account
            || self.amount_cents != other.amount_cents
            || self.currency != other.currency
            || self.transaction_date != other.transaction_date
            || self.netsuite_id != other.netsuite_id
    }
}

/// `(transaction_type, reference, environment)`: a PO and the bill raised against
/// it often share a reference.
type BudgetKey = (String, String, Environment);

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingBudgetRow {
    pub row_id: String,
    pub transaction: BudgetTransaction,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub creates: Vec<BudgetTransaction>,
    pub updates: Vec<(String, BudgetTransaction)>,
    pub unchanged: usize,
    /// Kissflow rows with no pushed transaction behind them. Never deleted.
    pub orphans: Vec<String>,
}

/// Compares the Kissflow dataset with the transactions that should be there.
/// Rows are matched on `(transaction_type, reference, environment)`; a duplicate Kissflow row for
/// an already matched key is reported as an orphan.
pub fn plan_reconciliation(
    existing: &[ExistingBudgetRow],
    desired: &[BudgetTransaction],
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    let mut by_key: HashMap<BudgetKey, &ExistingBudgetRow> = HashMap::new();
    for row in existing {
        let key = row.transaction.key();
        if by_key.contains_key(&key) {
            plan.orphans.push(row.row_id.clone());
        } else {
            by_key.insert(key, row);
        }
    }

    for transaction in desired {
        match by_key.remove(&transaction.key()) {
            None => plan.creates.push(transaction.clone()),
            Some(row) if row.transaction.differs_from(transaction) => plan
                .updates
                .push((row.row_id.clone(), transaction.clone())),
            Some(_) => plan.unchanged += 1,
        }
    }

    let mut leftovers: Vec<String> = by_key.into_values().map(|row| row.row_id.clone()).collect();
    leftovers.sort();
    plan.orphans.extend(leftovers);
    plan
}

fn text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transaction(reference: &str, amount_cents: i64) -> BudgetTransaction {
        BudgetTransaction {
            reference: reference.to_string(),
            transaction_type: "purchase_order".to_string(),
            budget_code: Some("OPS".to_string()),
            account: Some("6100".to_string()),
            amount_cents,
            currency: Some("MYR".to_string()),
            transaction_date: NaiveDate::from_ymd_opt(2024, 5, 2),
            netsuite_id: Some("881".to_string()),
            environment: Environment::Sandbox,
        }
    }

    fn existing(row_id: &str, transaction: BudgetTransaction) -> ExistingBudgetRow {
        ExistingBudgetRow {
            row_id: row_id.to_string(),
            transaction,
        }
    }

    #[test]
    fn plans_creates_updates_and_orphans() {
        let current = vec![
            existing("row-1", transaction("PO-1", 10_000)),
            existing("row-2", transaction("PO-2", 5_000)),
            existing("row-3", transaction("PO-9", 1_000)),
            existing("row-4", transaction("PO-1", 10_000)),
        ];
        let desired = vec![
            transaction("PO-1", 10_000),
            transaction("PO-2", 7_500),
            transaction("PO-3", 300),
        ];

        let plan = plan_reconciliation(&current, &desired);

        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, "row-2");
        assert_eq!(plan.updates[0].1.amount_cents, 7_500);
        assert_eq!(plan.creates, vec![transaction("PO-3", 300)]);
        assert_eq!(plan.orphans, vec!["row-4".to_string(), "row-3".to_string()]);
    }

    #[test]
    fn transaction_types_sharing_a_reference_are_distinct_rows() {
        let order = transaction("1001", 10_000);
        let mut bill = transaction("1001", 10_000);
        bill.transaction_type = "vendor_bill".to_string();
        bill.netsuite_id = Some("882".to_string());
        let current = vec![existing("r1", order.clone()), existing("r2", bill.clone())];

        let plan = plan_reconciliation(&current, &[order, bill.clone()]);

        assert_eq!(plan.unchanged, 2);
        assert!(plan.creates.is_empty());
        assert!(plan.updates.is_empty());
        assert!(plan.orphans.is_empty());

        let plan = plan_reconciliation(&current[..1], &[bill.clone()]);
        assert_eq!(plan.creates, vec![bill]);
        assert_eq!(plan.orphans, vec!["r1".to_string()]);
    }

    #[test]
    fn environments_are_reconciled_separately() {
        let mut production = transaction("PO-1", 10_000);
        production.environment = Environment::Production;
        let current = vec![existing("row-1", transaction("PO-1", 10_000))];

        let plan = plan_reconciliation(&current, &[production.clone()]);

        assert_eq!(plan.creates, vec![production]);
        assert_eq!(plan.orphans, vec!["row-1".to_string()]);
    }

    #[test]
    fn reads_kissflow_rows_and_writes_fields() {
        let row = json!({
            "_id": "Pk8x",
            "Reference": "VB-7",
            "Transaction_Type": "vendor_bill",
            "Amount": "1,250.40",
            "Transaction_Date": "2024-06-01T00:00:00Z",
            "Environment": "production"
        });

        let parsed = BudgetTransaction::from_kissflow_row(&row).unwrap();

        assert_eq!(parsed.row_id, "Pk8x");
        assert_eq!(parsed.transaction.amount_cents, 125_040);
        assert_eq!(parsed.transaction.transaction_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(parsed.transaction.environment, Environment::Production);
        assert!(BudgetTransaction::from_kissflow_row(&json!({"_id": "x"})).is_none());

        let fields = serde_json::to_value(transaction("PO-1", 12_345).to_kissflow_fields()).unwrap();
        assert_eq!(fields["Amount"], json!(123.45));
        assert_eq!(fields["Environment"], json!("sandbox"));
        assert_eq!(fields["Transaction_Date"], json!("2024-05-02"));

        let mut sparse = transaction("PO-2", 100);
        sparse.budget_code = None;
        let fields = serde_json::to_value(sparse.to_kissflow_fields()).unwrap();
        assert!(fields.get("Budget_Code").is_none());
    }
}
