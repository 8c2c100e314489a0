use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    environment::Environment,
    intake::IntakeKind,
    models::{LedgerEntry, RunCounts, RunStatus, SyncRun},
    reference::{ReferenceKind, ReferenceRecord},
};

use super::{config::CacheConfig, db::PgPool};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Local copy of NetSuite reference lists.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn upsert(&self, records: &[ReferenceRecord]) -> anyhow::Result<usize>;
    async fn get(
        &self,
        kind: ReferenceKind,
        env: Environment,
        internal_id: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>>;
    /// Case-insensitive match on name, then code, then internal id. Active rows
    /// win over inactive ones.
    async fn find_by_name(
        &self,
        kind: ReferenceKind,
        env: Environment,
        name: &str,
    ) -> anyhow::Result<Option<ReferenceRecord>>;
    async fn list(
        &self,
        kind: ReferenceKind,
        env: Environment,
        search: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<ReferenceRecord>>;
    async fn count(&self, kind: ReferenceKind, env: Environment) -> anyhow::Result<usize>;
    /// Flags every active row whose id is not in `seen` as inactive.
    async fn mark_missing_inactive(
        &self,
        kind: ReferenceKind,
        env: Environment,
        seen: &HashSet<String>,
    ) -> anyhow::Result<usize>;
}

/// Record of sheet documents pushed into NetSuite.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn find(
        &self,
        kind: IntakeKind,
        env: Environment,
        reference: &str,
    ) -> anyhow::Result<Option<LedgerEntry>>;
    /// Inserts or replaces the entry for `(kind, environment, reference)`. A stored
    /// `Synced` entry is only ever replaced by another `Synced` entry.
    async fn record(&self, entry: &LedgerEntry) -> anyhow::Result<()>;
    async fn synced(&self, env: Environment) -> anyhow::Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait SyncRunLog: Send + Sync {
    async fn start(&self, scope: &str, env: Environment) -> anyhow::Result<SyncRun>;
    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        message: Option<&str>,
    ) -> anyhow::Result<()>;
    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SyncRun>>;
}

#[derive(Clone)]
pub struct Stores {
    pub references: Arc<dyn ReferenceStore>,
    pub ledger: Arc<dyn TransactionLedger>,
    pub runs: Arc<dyn SyncRunLog>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            references: store.clone(),
            ledger: store.clone(),
            runs: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            references: store.clone(),
            ledger: store.clone(),
            runs: store,
        }
    }
}

pub fn build_stores(config: &CacheConfig, pool: Option<PgPool>) -> anyhow::Result<Stores> {
    match config.provider.as_str() {
        "postgres" => match pool {
            Some(pool) => Ok(Stores::postgres(pool)),
            None => anyhow::bail!("postgres cache requires a database pool"),
        },
        "memory" => Ok(Stores::memory()),
        other => anyhow::bail!("unsupported cache provider: {other}"),
    }
}
