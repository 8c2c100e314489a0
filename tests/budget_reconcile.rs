
use chrono::{NaiveDate, Utc};
use finance_bridge::{
    domain::{
        environment::Environment,
        intake::IntakeKind,
        models::{LedgerEntry, PushStatus},
    },
    infrastructure::store::Stores,
    services::{budget::BudgetService, errors::ServiceError},
};
use httpmock::prelude::*;
use httpmock::Method::PATCH;
use serde_json::{json, Value};
use uuid::Uuid;

use test_harness::{mock_state, BUDGET_DATASET, KISSFLOW_ACCOUNT};

fn entry(kind: IntakeKind, reference: &str, status: PushStatus, amount_cents: i64) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        kind,
        environment: Environment::Sandbox,
        reference: reference.to_string(),
        status,
        netsuite_id: Some(format!("ns-{reference}")),
        message: None,
        amount_cents,
        currency: Some("MYR".to_string()),
        department: Some("Finance".to_string()),
        account: Some("6100".to_string()),
        transaction_date: NaiveDate::from_ymd_opt(2024, 6, 1),
        pushed_at: Utc::now(),
    }
}

fn kissflow_row(row_id: &str, entry: &LedgerEntry) -> Value {
    let transaction = entry.budget_transaction().expect("budget row");
    let mut row = serde_json::to_value(transaction.to_kissflow_fields()).unwrap();
    row["_id"] = json!(row_id);
    row
}

#[tokio::test]
async fn creates_missing_rows_and_updates_changed_ones() {
    let server = MockServer::start_async().await;
    let stores = Stores::memory();
    let unchanged = entry(IntakeKind::PurchaseOrder, "PO-1", PushStatus::Synced, 2_500);
    let changed = entry(IntakeKind::VendorBill, "VB-2", PushStatus::Synced, 9_900);
    let missing = entry(IntakeKind::ExpenseReport, "ER-3", PushStatus::Synced, 3_560);
    for ledger_entry in [
        &unchanged,
        &changed,
        &missing,
        &entry(IntakeKind::Vendor, "VEN-1", PushStatus::Synced, 0),
        &entry(IntakeKind::PurchaseOrder, "PO-4", PushStatus::Failed, 100),
    ] {
        stores.ledger.record(ledger_entry).await.unwrap();
    }

    let mut stale = kissflow_row("row-b", &changed);
    stale["Amount"] = json!(90.0);
    let mut production = kissflow_row("row-c", &unchanged);
    production["Environment"] = json!("production");
    let dataset = format!("/dataset/2/{KISSFLOW_ACCOUNT}/{BUDGET_DATASET}");

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("{dataset}/list"))
                .query_param("page_number", "1");
            then.status(200)
                .json_body(json!({ "Data": [kissflow_row("row-a", &unchanged), stale] }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("{dataset}/list"))
                .query_param("page_number", "2");
            then.status(200).json_body(json!({ "Data": [production] }));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{dataset}/"))
                .json_body_partial(
                    r#"{ "Reference": "ER-3", "Transaction_Type": "expense_report", "Amount": 35.6, "Environment": "sandbox" }"#,
                );
            then.status(200).json_body(json!({ "_id": "row-new" }));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path(format!("{dataset}/row-b"))
                .json_body_partial(r#"{ "Reference": "VB-2", "Amount": 99.0 }"#);
            then.status(200).json_body(json!({}));
        })
        .await;
    let service = BudgetService::new(mock_state(&server, stores));

    let summary = service.reconcile(Environment::Sandbox).await.unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.orphaned, 0);
    assert_eq!(summary.failed, 0);
    create.assert_hits_async(1).await;
    update.assert_hits_async(1).await;
}

#[tokio::test]
async fn failed_writes_are_counted_not_fatal() {
    let server = MockServer::start_async().await;
    let stores = Stores::memory();
    stores
        .ledger
        .record(&entry(IntakeKind::PurchaseOrder, "PO-1", PushStatus::Synced, 1_000))
        .await
        .unwrap();
    let dataset = format!("/dataset/2/{KISSFLOW_ACCOUNT}/{BUDGET_DATASET}");
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{dataset}/list"));
            then.status(200).json_body(json!({
                "Data": [ { "_id": "orphan", "Reference": "PO-0", "Environment": "sandbox", "Amount": 1 } ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{dataset}/"));
            then.status(422).body("field error");
        })
        .await;
    let service = BudgetService::new(mock_state(&server, stores));

    let summary = service.reconcile(Environment::Sandbox).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.created, 0);
    assert_eq!(summary.orphaned, 1);
}

#[tokio::test]
async fn listing_failure_aborts_reconciliation() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/dataset/2/{KISSFLOW_ACCOUNT}/{BUDGET_DATASET}/list"));
            then.status(401).body("bad key");
        })
        .await;
    let service = BudgetService::new(mock_state(&server, Stores::memory()));

    let err = service.reconcile(Environment::Sandbox).await.unwrap_err();

    assert!(matches!(err, ServiceError::Upstream(_)));
}
