use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{
    environment::Environment,
    intake::IntakeKind,
    models::{LedgerEntry, PushStatus, RunCounts, RunStatus, SyncRun},
    reference::{ReferenceKind, ReferenceRecord},
};

use super::{ReferenceStore, SyncRunLog, TransactionLedger};

type ReferenceKey = (ReferenceKind, bool, String);
type LedgerKey = (IntakeKind, Environment, String);

/// Process-local store for tests and single-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    references: RwLock<HashMap<ReferenceKey, ReferenceRecord>>,
    ledger: RwLock<HashMap<LedgerKey, LedgerEntry>>,
    runs: RwLock<Vec<SyncRun>>,
}

fn match_rank(record: &ReferenceRecord, needle: &str) -> Option<u8> {
    if record.name.to_lowercase() == needle {
        Some(0)
    } else if record
        .code
        .as_deref()
        .is_some_and(|code| code.to_lowercase() == needle)
    {
        Some(1)
    } else if record.internal_id.to_lowercase() == needle {
        Some(2)
    } else {
        None
    }
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn upsert(&self, records: &[ReferenceRecord]) -> anyhow::Result<usize> {
        let mut references = self.references.write();
        for record in records {
            references.insert(
                (record.kind, record.is_sandbox, record.internal_id.clone()),
                record.clone(),
            );
        }
        Ok(records.len())
    }

    async fn get(
        &self,
        kind: ReferenceKind,
        env: Environment,
        internal_id: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>> {
        Ok(self
            .references
            .read()
            .get(&(kind, env.is_sandbox(), internal_id.to_string()))
            .cloned())
    }

    async fn find_by_name(
        &self,
        kind: ReferenceKind,
        env: Environment,
        name: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>> {
        let needle = name.trim().to_lowercase();
        let references = self.references.read();
        Ok(references
            .values()
            .filter(|record| record.kind == kind && record.is_sandbox == env.is_sandbox())
            .filter_map(|record| match_rank(record, &needle).map(|rank| (record, rank)))
            .min_by_key(|(record, rank)| (record.is_inactive, *rank, record.internal_id.clone()))
            .map(|(record, _)| record.clone()))
    }

    async fn list(
        &self,
        kind: ReferenceKind,
        env: Environment,
        search: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<ReferenceRecord>> {
        let needle = search.map(|s| s.trim().to_lowercase());
        let references = self.references.read();
        let mut records: Vec<ReferenceRecord> = references
            .values()
            .filter(|record| record.kind == kind && record.is_sandbox == env.is_sandbox())
            .filter(|record| match &needle {
                Some(needle) => {
                    record.name.to_lowercase().contains(needle.as_str())
                        || record
                            .code
                            .as_deref()
                            .is_some_and(|code| code.to_lowercase().contains(needle.as_str()))
                }
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.internal_id.cmp(&b.internal_id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn count(&self, kind: ReferenceKind, env: Environment) -> anyhow::Result<usize> {
        Ok(self
            .references
            .read()
            .values()
            .filter(|record| record.kind == kind && record.is_sandbox == env.is_sandbox())
            .count())
    }

    async fn mark_missing_inactive(
        &self,
        kind: ReferenceKind,
        env: Environment,
        seen: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        let mut references = self.references.write();
        let mut changed = 0;
        for record in references.values_mut() {
            if record.kind == kind
                && record.is_sandbox == env.is_sandbox()
                && !record.is_inactive
                && !seen.contains(&record.internal_id)
            {
                record.is_inactive = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl TransactionLedger for MemoryStore {
    async fn find(
        &self,
        kind: IntakeKind,
        env: Environment,
        reference: &str,
    ) -> anyhow::Result<Option<LedgerEntry>> {
        Ok(self
            .ledger
            .read()
            .get(&(kind, env, reference.to_string()))
            .cloned())
    }

    async fn record(&self, entry: &LedgerEntry) -> anyhow::Result<()> {
        let mut ledger = self.ledger.write();
        let key = (entry.kind, entry.environment, entry.reference.clone());
        if ledger.get(&key).is_some_and(LedgerEntry::is_synced) && !entry.is_synced() {
            return Ok(());
        }
        ledger.insert(key, entry.clone());
        Ok(())
    }

    async fn synced(&self, env: Environment) -> anyhow::Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .read()
            .values()
            .filter(|entry| entry.environment == env && entry.status == PushStatus::Synced)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.pushed_at.cmp(&b.pushed_at).then(a.reference.cmp(&b.reference)));
        Ok(entries)
    }
}

#[async_trait]
impl SyncRunLog for MemoryStore {
    async fn start(&self, scope: &str, env: Environment) -> anyhow::Result<SyncRun> {
        let run = SyncRun {
            id: Uuid::new_v4(),
            scope: scope.to_string(),
            environment: env,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.write().push(run.clone());
        Ok(run)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        message: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut runs = self.runs.write();
        let Some(run) = runs.iter_mut().find(|run| run.id == id) else {
            anyhow::bail!("unknown sync run {id}");
        };
        run.status = status;
        run.counts = counts.clone();
        run.message = message.map(str::to_string);
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SyncRun>> {
        let runs = self.runs.read();
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}
