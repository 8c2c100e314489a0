use std::{convert::TryFrom, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    Postgres, Type, TypeInfo,
};
use uuid::Uuid;

use super::{budget::BudgetTransaction, environment::Environment, intake::IntakeKind};

/// Outcome of pushing one sheet document into NetSuite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    Synced,
    Failed,
}

impl PushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushStatus::Synced => "synced",
            PushStatus::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for PushStatus {
    type Error = StatusParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synced" => Ok(PushStatus::Synced),
            "failed" => Ok(PushStatus::Failed),
            _ => Err(StatusParseError::new(value)),
        }
    }
}

impl Type<Postgres> for PushStatus {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        matches!(ty.name(), "text" | "varchar" | "bpchar")
    }
}

impl<'q> Encode<'q, Postgres> for PushStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for PushStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        PushStatus::try_from(raw).map_err(|err| Box::new(err) as BoxDynError)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for RunStatus {
    type Error = StatusParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(StatusParseError::new(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusParseError {
    value: String,
}

impl StatusParseError {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported status value: {}", self.value)
    }
}

impl std::error::Error for StatusParseError {}

/// One pushed (or failed) sheet document, keyed on `(kind, environment, reference)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub kind: IntakeKind,
    pub environment: Environment,
    pub reference: String,
    pub status: PushStatus,
    pub netsuite_id: Option<String>,
    pub message: Option<String>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub department: Option<String>,
    pub account: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub pushed_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_synced(&self) -> bool {
        self.status == PushStatus::Synced
    }

    /// Budget row for a successfully pushed transaction. Vendors and failed pushes
    /// have none.
    pub fn budget_transaction(&self) -> Option<BudgetTransaction> {
        if !self.is_synced() || !self.kind.is_transaction() {
            return None;
        }
        Some(BudgetTransaction {
            reference: self.reference.clone(),
            transaction_type: self.kind.as_str().to_string(),
            budget_code: self.department.clone(),
            account: self.account.clone(),
            amount_cents: self.amount_cents,
            currency: self.currency.clone(),
            transaction_date: self.transaction_date,
            netsuite_id: self.netsuite_id.clone(),
            environment: self.environment,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: i64,
    pub upserted: i64,
    pub deactivated: i64,
    pub skipped: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub scope: String,
    pub environment: Environment,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: IntakeKind, status: PushStatus) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            environment: Environment::Sandbox,
            reference: "PO-1".to_string(),
            status,
            netsuite_id: Some("12".to_string()),
            message: None,
            amount_cents: 4_200,
            currency: Some("MYR".to_string()),
            department: Some("Operations".to_string()),
            account: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            pushed_at: Utc::now(),
        }
    }

    #[test]
    fn only_synced_transactions_produce_budget_rows() {
        let budget = entry(IntakeKind::PurchaseOrder, PushStatus::Synced)
            .budget_transaction()
            .unwrap();
        assert_eq!(budget.transaction_type, "purchase_order");
        assert_eq!(budget.budget_code.as_deref(), Some("Operations"));
        assert_eq!(budget.amount_cents, 4_200);

        assert!(entry(IntakeKind::PurchaseOrder, PushStatus::Failed)
            .budget_transaction()
            .is_none());
        assert!(entry(IntakeKind::Vendor, PushStatus::Synced)
            .budget_transaction()
            .is_none());
    }

    #[test]
    fn statuses_parse_from_text() {
        assert_eq!(PushStatus::try_from("Synced").unwrap(), PushStatus::Synced);
        assert_eq!(RunStatus::try_from("failed").unwrap(), RunStatus::Failed);
        assert!(RunStatus::try_from("paused").is_err());
    }
}
