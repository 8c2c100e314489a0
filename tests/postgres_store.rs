
use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use finance_bridge::{
    domain::{
        environment::Environment,
        intake::IntakeKind,
        models::{LedgerEntry, PushStatus, RunCounts, RunStatus},
        reference::ReferenceKind,
    },
    infrastructure::store::Stores,
};
use serde_json::json;
use uuid::Uuid;

use test_harness::{reference, run_test};

#[tokio::test]
async fn reference_rows_round_trip_through_postgres() -> anyhow::Result<()> {
    run_test(|pool| async move {
        let stores = Stores::postgres(pool);
        let suffix = Uuid::new_v4().simple().to_string();
        let kept_id = format!("keep-{suffix}");
        let gone_id = format!("gone-{suffix}");
        let name = format!("Vendor {suffix}");

        let mut kept = reference(ReferenceKind::Vendor, &kept_id, &name, Some("V-1"));
        kept.attributes.insert("custentity_einv_tin".into(), json!("C99"));
        let gone = reference(ReferenceKind::Vendor, &gone_id, "Retired vendor", None);
        stores.references.upsert(&[kept, gone]).await?;

        let found = stores
            .references
            .find_by_name(ReferenceKind::Vendor, Environment::Sandbox, &name.to_uppercase())
            .await?
            .expect("vendor by name");
        assert_eq!(found.internal_id, kept_id);
        assert_eq!(found.attribute("custentity_einv_tin").as_deref(), Some("C99"));
        assert!(stores
            .references
            .get(ReferenceKind::Vendor, Environment::Production, &kept_id)
            .await?
            .is_none());

        let seen: HashSet<String> = [kept_id.clone()].into_iter().collect();
        stores
            .references
            .mark_missing_inactive(ReferenceKind::Vendor, Environment::Sandbox, &seen)
            .await?;
        let retired = stores
            .references
            .get(ReferenceKind::Vendor, Environment::Sandbox, &gone_id)
            .await?
            .expect("row kept");
        assert!(retired.is_inactive);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn ledger_upserts_on_reference_without_downgrading_synced() -> anyhow::Result<()> {
    run_test(|pool| async move {
        let stores = Stores::postgres(pool);
        let reference = format!("PO-{}", Uuid::new_v4().simple());
        let mut entry = LedgerEntry {
            id: Uuid::new_v4(),
            kind: IntakeKind::PurchaseOrder,
            environment: Environment::Sandbox,
            reference: reference.clone(),
            status: PushStatus::Failed,
            netsuite_id: None,
            message: Some("unknown vendor".into()),
            amount_cents: 1_250,
            currency: Some("MYR".into()),
            department: None,
            account: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            pushed_at: Utc::now(),
        };
        stores.ledger.record(&entry).await?;

        entry.status = PushStatus::Synced;
        entry.netsuite_id = Some("9001".into());
        entry.message = None;
        stores.ledger.record(&entry).await?;

        entry.status = PushStatus::Failed;
        entry.netsuite_id = None;
        entry.message = Some("duplicate externalId".into());
        stores.ledger.record(&entry).await?;

        let stored = stores
            .ledger
            .find(IntakeKind::PurchaseOrder, Environment::Sandbox, &reference)
            .await?
            .expect("ledger entry");
        assert_eq!(stored.status, PushStatus::Synced);
        assert_eq!(stored.netsuite_id.as_deref(), Some("9001"));
        assert!(stores
            .ledger
            .synced(Environment::Sandbox)
            .await?
            .iter()
            .any(|synced| synced.reference == reference));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn sync_runs_are_started_and_finished() -> anyhow::Result<()> {
    run_test(|pool| async move {
        let stores = Stores::postgres(pool);
        let run = stores.runs.start("currency", Environment::Production).await?;
        let counts = RunCounts {
            fetched: 3,
            upserted: 3,
            ..RunCounts::default()
        };
        stores
            .runs
            .finish(run.id, RunStatus::Succeeded, &counts, None)
            .await?;

        let recent = stores.runs.recent(50).await?;
        let finished = recent
            .iter()
            .find(|candidate| candidate.id == run.id)
            .expect("run listed");
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.counts, counts);
        assert_eq!(finished.environment, Environment::Production);
        assert!(finished.finished_at.is_some());
        Ok(())
    })
    .await
}
