//! Integration tests for the SQLite record store.
//!
//! These tests require the database feature:
//! ```bash
//! cargo test -p aw-core --features database --test sqlite_integration_tests
//! ```

#![cfg(feature = "database")]

use aw_core::store::{create_pool, AssetFilter, AssetRecordStore, SqliteAssetStore, StoreError};
use aw_core::{
    Asset, AssetDraft, AssetService, AssetStatus, AssetType, DedupError, MergeStrategy,
    TenantScope, UpsertOptions,
};
use serde_json::json;
use uuid::Uuid;

async fn create_test_store() -> SqliteAssetStore {
    let pool = create_pool("sqlite::memory:")
        .await
        .expect("Failed to create pool");
    let store = SqliteAssetStore::new(pool);
    store.migrate().await.expect("Failed to run migrations");
    store
}

fn test_scope() -> TenantScope {
    TenantScope::new(Uuid::new_v4(), Uuid::new_v4()).unwrap()
}

#[tokio::test]
async fn test_sqlite_round_trips_every_column() {
    let store = create_test_store().await;
    let scope = test_scope();

    let mut asset = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    asset.hostname = Some("h1".to_string());
    asset.fully_qualified_domain_name = Some("h1.corp.example".to_string());
    asset.ip_address = Some("10.0.0.1".to_string());
    asset.cpu_cores = Some(0);
    asset.memory_gb = Some(15.5);
    asset.is_virtual = Some(false);
    asset.description = Some(String::new());
    asset.custom_attributes.insert("rack".to_string(), json!("R12"));
    asset.import_metadata = Some(json!({ "external_id": "CMDB-42" }));

    let mut session = store.begin().await.unwrap();
    session.insert(asset.clone()).await.unwrap();

    let found = session
        .find(&scope, &AssetFilter::ExternalId("CMDB-42".to_string()))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let loaded = &found[0];
    assert_eq!(loaded.id, asset.id);
    assert_eq!(loaded.cpu_cores, Some(0));
    assert_eq!(loaded.is_virtual, Some(false));
    assert_eq!(loaded.description.as_deref(), Some(""));
    assert_eq!(loaded.memory_gb, Some(15.5));
    assert_eq!(loaded.custom_attributes.get("rack"), Some(&json!("R12")));
    assert_eq!(loaded.created_at, asset.created_at);
    session.commit().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_filters_by_scope_and_soft_delete() {
    let store = create_test_store().await;
    let scope = test_scope();
    let other = test_scope();

    let mut session = store.begin().await.unwrap();
    session
        .insert(Asset::new(&scope, "srv1".to_string(), AssetType::Server))
        .await
        .unwrap();
    session
        .insert(Asset::new(&other, "srv1".to_string(), AssetType::Server))
        .await
        .unwrap();
    let mut deleted = Asset::new(&scope, "srv2".to_string(), AssetType::Server);
    deleted.deleted_at = Some(chrono::Utc::now());
    session.insert(deleted).await.unwrap();

    let found = session
        .find(
            &scope,
            &AssetFilter::NameIn(vec!["srv1".to_string(), "srv2".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].client_account_id, scope.client_account_id);
}

#[tokio::test]
async fn test_sqlite_name_contains_escapes_wildcards() {
    let store = create_test_store().await;
    let scope = test_scope();

    let mut session = store.begin().await.unwrap();
    session
        .insert(Asset::new(&scope, "web_01".to_string(), AssetType::Server))
        .await
        .unwrap();
    session
        .insert(Asset::new(&scope, "webX01".to_string(), AssetType::Server))
        .await
        .unwrap();

    let found = session
        .find(&scope, &AssetFilter::NameContains("WEB_".to_string()))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "web_01");
}

#[tokio::test]
async fn test_sqlite_unique_violation_keeps_transaction_usable() {
    let store = create_test_store().await;
    let scope = test_scope();

    let mut session = store.begin().await.unwrap();
    session
        .insert(Asset::new(&scope, "srv1".to_string(), AssetType::Server))
        .await
        .unwrap();

    session.stage_insert(Asset::new(&scope, "srv2".to_string(), AssetType::Server));
    session.stage_insert(Asset::new(&scope, "srv1".to_string(), AssetType::Database));
    let err = session.flush().await.unwrap_err();
    assert!(err.is_unique_violation());
    session.rollback_to_usable().await.unwrap();

    // srv2 was rolled back with the rest of the failed flush.
    let found = session
        .find(
            &scope,
            &AssetFilter::NameIn(vec!["srv1".to_string(), "srv2".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    session
        .insert(Asset::new(&scope, "srv3".to_string(), AssetType::Server))
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert_eq!(store.count(&scope).await.unwrap(), 2);
}

#[tokio::test]
async fn test_sqlite_soft_deleted_name_can_be_reused() {
    let store = create_test_store().await;
    let scope = test_scope();

    let mut deleted = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    deleted.deleted_at = Some(chrono::Utc::now());

    let mut session = store.begin().await.unwrap();
    session.insert(deleted).await.unwrap();
    session
        .insert(Asset::new(&scope, "srv1".to_string(), AssetType::Server))
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert_eq!(store.count(&scope).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_service_create_then_upsert() {
    let store = create_test_store().await;
    let scope = test_scope();
    let mut service = AssetService::new(store.begin().await.unwrap());

    let mut draft = AssetDraft::named("srv1")
        .with_asset_type(AssetType::Server)
        .with_hostname("h1");
    let (created, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Created);

    draft.operating_system = Some("Ubuntu22".to_string());
    let (updated, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::upsert(MergeStrategy::Overwrite))
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Updated);
    assert_eq!(updated.id, created.id);

    let (existing, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Existed);
    assert_eq!(existing.operating_system.as_deref(), Some("Ubuntu22"));

    service.into_store().commit().await.unwrap();
    assert_eq!(store.count(&scope).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_missing_name_propagates_integrity_violation() {
    let store = create_test_store().await;
    let scope = test_scope();
    let mut service = AssetService::new(store.begin().await.unwrap());

    let err = service
        .create_or_update(
            &AssetDraft::default().with_hostname("h1"),
            &scope,
            &UpsertOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DedupError::Store(StoreError::IntegrityViolation(_))
    ));

    // The transaction is still usable after the failed insert.
    let (_, status) = service
        .create_or_update(
            &AssetDraft::named("srv1").with_hostname("h1"),
            &scope,
            &UpsertOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Created);
    service.into_store().commit().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_bulk_ingest_single_flush() {
    let store = create_test_store().await;
    let scope = test_scope();
    let mut service = AssetService::new(store.begin().await.unwrap());

    let drafts: Vec<AssetDraft> = (0..50)
        .map(|i| {
            AssetDraft::named(format!("node-{i:02}"))
                .with_asset_type(AssetType::Server)
                .with_hostname(format!("host-{i:02}"))
        })
        .chain(std::iter::once(
            AssetDraft::named("node-00-alias").with_hostname("host-00"),
        ))
        .collect();

    let results = service
        .bulk_create_or_update(&drafts, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 51);
    assert_eq!(results[50].1, AssetStatus::Existed);
    assert_eq!(results[50].0.id, results[0].0.id);

    service.into_store().commit().await.unwrap();
    assert_eq!(store.count(&scope).await.unwrap(), 50);
}

#[tokio::test]
async fn test_sqlite_bulk_flush_failure_rolls_back_batch() {
    let store = create_test_store().await;
    let scope = test_scope();
    let mut service = AssetService::new(store.begin().await.unwrap());

    let drafts = vec![
        AssetDraft::named("srv1"),
        AssetDraft::default().with_hostname("nameless"),
    ];
    let err = service
        .bulk_create_or_update(&drafts, &scope, &UpsertOptions::default())
        .await
        .unwrap_err();
    assert!(err.as_store_error().is_some_and(StoreError::is_integrity_violation));

    service.into_store().commit().await.unwrap();
    assert_eq!(store.count(&scope).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_concurrent_sessions_create_once() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("assets.db").display());
    let pool = create_pool(&url).await.expect("Failed to create pool");
    let store = SqliteAssetStore::new(pool);
    store.migrate().await.expect("Failed to run migrations");
    let scope = test_scope();

    let ingest = |store: SqliteAssetStore| async move {
        let mut service = AssetService::new(store.begin().await?);
        let draft = AssetDraft::named("srv1").with_asset_type(AssetType::Server);
        let (asset, status) = service
            .create_or_update(&draft, &scope, &UpsertOptions::default())
            .await?;
        service.into_store().commit().await?;
        Ok::<_, DedupError>((asset, status))
    };

    let (a, b) = tokio::join!(ingest(store.clone()), ingest(store.clone()));
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut statuses = vec![a.1, b.1];
    statuses.sort_by_key(|status| status.as_str());
    assert_eq!(statuses, vec![AssetStatus::Created, AssetStatus::Existed]);
    assert_eq!(a.0.id, b.0.id);
    assert_eq!(store.count(&scope).await.unwrap(), 1);
}
