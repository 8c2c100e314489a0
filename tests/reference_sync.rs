
use finance_bridge::{
    domain::{environment::Environment, models::RunStatus, reference::ReferenceKind},
    infrastructure::store::Stores,
    services::{errors::ServiceError, reference_sync::ReferenceSyncService},
};
use httpmock::prelude::*;
use serde_json::json;

use test_harness::{mock_state, reference};

async fn mock_currency_pages(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/services/rest/query/v1/suiteql")
                .json_body(json!({ "q": "SELECT id, symbol, name, isinactive FROM currency ORDER BY id" }));
            then.status(200).json_body(json!({
                "items": [
                    { "links": [], "id": "1", "symbol": "MYR", "name": "Malaysian Ringgit", "isinactive": "F" },
                    { "links": [], "id": "2", "symbol": "USD", "name": "US Dollar", "isinactive": "F" }
                ],
                "hasMore": true
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/services/rest/query/v1/suiteql")
                .json_body(json!({ "q": "SELECT id, symbol, name, isinactive FROM currency WHERE id > 2 ORDER BY id" }));
            then.status(200).json_body(json!({
                "items": [ { "id": "5", "symbol": "SGD", "name": "Singapore Dollar", "isinactive": "T" } ],
                "hasMore": false
            }));
        })
        .await;
}

#[tokio::test]
async fn sync_upserts_and_deactivates_missing_rows() {
    let server = MockServer::start_async().await;
    mock_currency_pages(&server).await;
    let stores = Stores::memory();
    stores
        .references
        .upsert(&[reference(ReferenceKind::Currency, "4", "Thai Baht", Some("THB"))])
        .await
        .unwrap();
    let service = ReferenceSyncService::new(mock_state(&server, stores.clone()));

    let summary = service
        .sync(ReferenceKind::Currency, Environment::Sandbox)
        .await
        .expect("sync succeeds");

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.counts.fetched, 3);
    assert_eq!(summary.counts.upserted, 3);
    assert_eq!(summary.counts.deactivated, 1);
    assert_eq!(summary.counts.skipped, 0);

    let myr = stores
        .references
        .find_by_name(ReferenceKind::Currency, Environment::Sandbox, "myr")
        .await
        .unwrap()
        .expect("MYR cached");
    assert_eq!(myr.internal_id, "1");
    assert!(!myr.attributes.contains_key("links"));
    let baht = stores
        .references
        .get(ReferenceKind::Currency, Environment::Sandbox, "4")
        .await
        .unwrap()
        .unwrap();
    assert!(baht.is_inactive);
    assert_eq!(
        stores
            .references
            .count(ReferenceKind::Currency, Environment::Production)
            .await
            .unwrap(),
        0
    );

    let runs = stores.runs.recent(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].scope, "currency");
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    assert_eq!(runs[0].counts.deactivated, 1);
}

#[tokio::test]
async fn failed_sync_is_recorded_and_returned() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/services/rest/query/v1/suiteql");
            then.status(500).body("boom");
        })
        .await;
    let stores = Stores::memory();
    let service = ReferenceSyncService::new(mock_state(&server, stores.clone()));

    let err = service
        .sync(ReferenceKind::Department, Environment::Sandbox)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Upstream(_)));
    let runs = stores.runs.recent(1).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].message.as_deref().unwrap_or_default().contains("boom"));
}

#[tokio::test]
async fn sync_all_keeps_going_after_a_failing_list() {
    let server = MockServer::start_async().await;
    mock_currency_pages(&server).await;
    let stores = Stores::memory();
    let service = ReferenceSyncService::new(mock_state(&server, stores.clone()));

    let summaries = service.sync_all(Environment::Sandbox).await.unwrap();

    assert_eq!(summaries.len(), ReferenceKind::ALL.len());
    let currency = summaries
        .iter()
        .find(|summary| summary.kind == ReferenceKind::Currency)
        .unwrap();
    assert_eq!(currency.status, RunStatus::Succeeded);
    let failed = summaries
        .iter()
        .filter(|summary| summary.status == RunStatus::Failed)
        .count();
    assert_eq!(failed, ReferenceKind::ALL.len() - 1);
    assert_eq!(stores.runs.recent(20).await.unwrap().len(), ReferenceKind::ALL.len());
}

#[tokio::test]
async fn unconfigured_environment_is_rejected_up_front() {
    let server = MockServer::start_async().await;
    let stores = Stores::memory();
    let service = ReferenceSyncService::new(mock_state(&server, stores.clone()));

    let err = service.sync_all(Environment::Production).await.unwrap_err();

    assert!(matches!(err, ServiceError::NotConfigured(_)));
    assert!(stores.runs.recent(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn incomplete_fetch_leaves_cached_rows_active() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/services/rest/query/v1/suiteql");
            then.status(200).json_body(json!({
                "items": [
                    { "id": "1", "symbol": "MYR", "name": "Malaysian Ringgit", "isinactive": "F" },
                    { "symbol": "???", "name": "Row without id" }
                ],
                "hasMore": true
            }));
        })
        .await;
    let stores = Stores::memory();
    stores
        .references
        .upsert(&[reference(ReferenceKind::Currency, "4", "Thai Baht", Some("THB"))])
        .await
        .unwrap();
    let service = ReferenceSyncService::new(mock_state(&server, stores.clone()));

    let err = service
        .sync(ReferenceKind::Currency, Environment::Sandbox)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Upstream(_)));
    let baht = stores
        .references
        .get(ReferenceKind::Currency, Environment::Sandbox, "4")
        .await
        .unwrap()
        .unwrap();
    assert!(!baht.is_inactive);
    assert_eq!(stores.runs.recent(1).await.unwrap()[0].status, RunStatus::Failed);
}
