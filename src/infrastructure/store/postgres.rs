use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::domain::{
    environment::Environment,
    intake::IntakeKind,
    models::{LedgerEntry, PushStatus, RunCounts, RunStatus, SyncRun},
    reference::{ReferenceKind, ReferenceRecord},
};

use super::{ReferenceStore, SyncRunLog, TransactionLedger};
use crate::infrastructure::db::PgPool;

const REFERENCE_COLUMNS: &str =
    "kind, is_sandbox, internal_id, name, code, is_inactive, attributes, synced_at";

const LEDGER_COLUMNS: &str = "id, kind, is_sandbox, reference, status, netsuite_id, message, \
     amount_cents, currency, department, account, transaction_date, pushed_at";

const RUN_COLUMNS: &str = "id, scope, is_sandbox, status, fetched, upserted, deactivated, \
     skipped, failed, message, started_at, finished_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceStore for PgStore {
    async fn upsert(&self, records: &[ReferenceRecord]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO reference_records (kind, is_sandbox, internal_id, name, code, is_inactive, attributes, synced_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                 ON CONFLICT (kind, is_sandbox, internal_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    code = EXCLUDED.code,
                    is_inactive = EXCLUDED.is_inactive,
                    attributes = EXCLUDED.attributes,
                    synced_at = EXCLUDED.synced_at",
            )
            .bind(record.kind.as_str())
            .bind(record.is_sandbox)
            .bind(&record.internal_id)
            .bind(&record.name)
            .bind(&record.code)
            .bind(record.is_inactive)
            .bind(Value::Object(record.attributes.clone()))
            .bind(record.synced_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert {} {}", record.kind, record.internal_id))?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn get(
        &self,
        kind: ReferenceKind,
        env: Environment,
        internal_id: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM reference_records
             WHERE kind = $1 AND is_sandbox = $2 AND internal_id = $3"
        ))
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .bind(internal_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_reference).transpose()
    }

    async fn find_by_name(
        &self,
        kind: ReferenceKind,
        env: Environment,
        name: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM reference_records
             WHERE kind = $1 AND is_sandbox = $2
               AND (lower(name) = lower($3) OR lower(code) = lower($3) OR lower(internal_id) = lower($3))
             ORDER BY is_inactive ASC,
                      CASE WHEN lower(name) = lower($3) THEN 0
                           WHEN lower(code) = lower($3) THEN 1
                           ELSE 2 END ASC,
                      internal_id ASC
             LIMIT 1"
        ))
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_reference).transpose()
    }

    async fn list(
        &self,
        kind: ReferenceKind,
        env: Environment,
        search: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<ReferenceRecord>> {
        let pattern = search.map(|s| format!("%{}%", escape_like(s.trim())));
        let rows = sqlx::query(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM reference_records
             WHERE kind = $1 AND is_sandbox = $2
               AND ($3::text IS NULL OR name ILIKE $3 OR code ILIKE $3)
             ORDER BY name ASC, internal_id ASC
             LIMIT $4"
        ))
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_reference).collect()
    }

    async fn count(&self, kind: ReferenceKind, env: Environment) -> anyhow::Result<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM reference_records WHERE kind = $1 AND is_sandbox = $2",
        )
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn mark_missing_inactive(
        &self,
        kind: ReferenceKind,
        env: Environment,
        seen: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        let seen: Vec<String> = seen.iter().cloned().collect();
        let result = sqlx::query(
            "UPDATE reference_records SET is_inactive = TRUE, synced_at = $4
             WHERE kind = $1 AND is_sandbox = $2 AND is_inactive = FALSE
               AND NOT (internal_id = ANY($3))",
        )
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .bind(seen)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl TransactionLedger for PgStore {
    async fn find(
        &self,
        kind: IntakeKind,
        env: Environment,
        reference: &str,
    ) -> anyhow::Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger
             WHERE kind = $1 AND is_sandbox = $2 AND reference = $3"
        ))
        .bind(kind.as_str())
        .bind(env.is_sandbox())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_ledger).transpose()
    }

    async fn record(&self, entry: &LedgerEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO transaction_ledger (id, kind, is_sandbox, reference, status, netsuite_id, message,
                                             amount_cents, currency, department, account, transaction_date, pushed_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
             ON CONFLICT (kind, is_sandbox, reference) DO UPDATE SET
                status = EXCLUDED.status,
                netsuite_id = EXCLUDED.netsuite_id,
                message = EXCLUDED.message,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                department = EXCLUDED.department,
                account = EXCLUDED.account,
                transaction_date = EXCLUDED.transaction_date,
                pushed_at = EXCLUDED.pushed_at
             WHERE transaction_ledger.status <> 'synced' OR EXCLUDED.status = 'synced'",
        )
        .bind(entry.id)
        .bind(entry.kind.as_str())
        .bind(entry.environment.is_sandbox())
        .bind(&entry.reference)
        .bind(entry.status)
        .bind(&entry.netsuite_id)
        .bind(&entry.message)
        .bind(entry.amount_cents)
        .bind(&entry.currency)
        .bind(&entry.department)
        .bind(&entry.account)
        .bind(entry.transaction_date)
        .bind(entry.pushed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record ledger entry {}", entry.reference))?;
        Ok(())
    }

    async fn synced(&self, env: Environment) -> anyhow::Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM transaction_ledger
             WHERE is_sandbox = $1 AND status = $2
             ORDER BY pushed_at ASC, reference ASC"
        ))
        .bind(env.is_sandbox())
        .bind(PushStatus::Synced)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_ledger).collect()
    }
}

#[async_trait]
impl SyncRunLog for PgStore {
    async fn start(&self, scope: &str, env: Environment) -> anyhow::Result<SyncRun> {
        let row = sqlx::query(&format!(
            "INSERT INTO sync_runs (id, scope, is_sandbox, status, started_at)
             VALUES ($1,$2,$3,$4,$5) RETURNING {RUN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(scope)
        .bind(env.is_sandbox())
        .bind(RunStatus::Running.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        map_run(row)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        message: Option<&str>,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE sync_runs SET status=$1, fetched=$2, upserted=$3, deactivated=$4, skipped=$5,
                                  failed=$6, message=$7, finished_at=$8
             WHERE id=$9",
        )
        .bind(status.as_str())
        .bind(counts.fetched)
        .bind(counts.upserted)
        .bind(counts.deactivated)
        .bind(counts.skipped)
        .bind(counts.failed)
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("unknown sync run {id}");
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_run).collect()
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn map_reference(row: PgRow) -> anyhow::Result<ReferenceRecord> {
    let kind = row
        .try_get::<String, _>("kind")?
        .parse::<ReferenceKind>()
        .map_err(anyhow::Error::msg)?;
    let attributes = match row.try_get::<Value, _>("attributes")? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(ReferenceRecord {
        kind,
        is_sandbox: row.try_get("is_sandbox")?,
        internal_id: row.try_get("internal_id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        is_inactive: row.try_get("is_inactive")?,
        attributes,
        synced_at: row.try_get("synced_at")?,
    })
}

fn map_ledger(row: PgRow) -> anyhow::Result<LedgerEntry> {
    let kind = row
        .try_get::<String, _>("kind")?
        .parse::<IntakeKind>()
        .map_err(anyhow::Error::msg)?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        kind,
        environment: Environment::from_sandbox_flag(row.try_get("is_sandbox")?),
        reference: row.try_get("reference")?,
        status: row.try_get::<PushStatus, _>("status")?,
        netsuite_id: row.try_get("netsuite_id")?,
        message: row.try_get("message")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        department: row.try_get("department")?,
        account: row.try_get("account")?,
        transaction_date: row.try_get("transaction_date")?,
        pushed_at: row.try_get("pushed_at")?,
    })
}

fn map_run(row: PgRow) -> anyhow::Result<SyncRun> {
    let status = RunStatus::try_from(row.try_get::<String, _>("status")?.as_str())?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        scope: row.try_get("scope")?,
        environment: Environment::from_sandbox_flag(row.try_get("is_sandbox")?),
        status,
        counts: RunCounts {
            fetched: row.try_get("fetched")?,
            upserted: row.try_get("upserted")?,
            deactivated: row.try_get("deactivated")?,
            skipped: row.try_get("skipped")?,
            failed: row.try_get("failed")?,
        },
        message: row.try_get("message")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}
