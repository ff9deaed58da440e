//! Integration tests for single-record and batch ingestion.
//!
//! These run against the in-memory record store and cover the end-to-end
//! ingestion scenarios: creation, idempotent resubmission, enrichment,
//! overwrite, detection-only mode and concurrent creation races.
//!
//! ```bash
//! cargo test -p aw-core --test ingestion_integration_tests
//! ```

use async_trait::async_trait;
use aw_core::{
    Asset, AssetDraft, AssetField, AssetFilter, AssetRecordStore, AssetService, AssetStatus,
    AssetType, DedupConfig, InMemoryAssetStore, InMemorySession, MatchCriterion, MergeStrategy,
    StoreResult, TenantScope, UpsertOptions,
};
use uuid::Uuid;

fn test_scope() -> TenantScope {
    TenantScope::new(Uuid::new_v4(), Uuid::new_v4()).unwrap()
}

fn server(name: &str) -> AssetDraft {
    AssetDraft::named(name).with_asset_type(AssetType::Server)
}

/// Seeds committed assets into `store`.
async fn seed(store: &InMemoryAssetStore, assets: Vec<Asset>) -> Vec<Asset> {
    let mut session = store.session();
    let mut seeded = Vec::with_capacity(assets.len());
    for asset in assets {
        seeded.push(session.insert(asset).await.unwrap());
    }
    session.commit();
    seeded
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_scenario_create_then_existed() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut service = AssetService::new(store.session());
    let draft = server("srv1").with_hostname("h1");

    let (created, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Created);
    assert_eq!(created.name, "srv1");
    assert_eq!(created.hostname.as_deref(), Some("h1"));
    assert_eq!(created.client_account_id, scope.client_account_id);

    let (existing, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Existed);
    assert_eq!(existing, created);
    assert_eq!(store.count(&scope).await, 1);
}

#[tokio::test]
async fn test_scenario_enrich_fills_absent_ip() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut original = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    original.hostname = Some("h1".to_string());
    original.operating_system = Some("CentOS7".to_string());
    let original = seed(&store, vec![original]).await.remove(0);

    let mut draft = server("srv1");
    draft.ip_address = Some("10.0.0.5".to_string());
    let mut service = AssetService::new(store.session());
    let (updated, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::upsert(MergeStrategy::Enrich))
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Updated);
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.ip_address.as_deref(), Some("10.0.0.5"));
    assert_eq!(updated.hostname, original.hostname);
    assert_eq!(updated.operating_system, original.operating_system);
    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);

    let stored = store.get(original.id).await.unwrap();
    assert_eq!(stored.ip_address.as_deref(), Some("10.0.0.5"));
}

#[tokio::test]
async fn test_scenario_overwrite_replaces_value() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut original = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    original.operating_system = Some("CentOS7".to_string());
    let original = seed(&store, vec![original]).await.remove(0);

    let mut draft = server("srv1");
    draft.operating_system = Some("Ubuntu22".to_string());
    let mut service = AssetService::new(store.session());
    let (updated, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::upsert(MergeStrategy::Overwrite))
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Updated);
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.operating_system.as_deref(), Some("Ubuntu22"));
    assert_eq!(store.count(&scope).await, 1);
}

#[tokio::test]
async fn test_scenario_detection_only_reports_conflict() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut original = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    original.hostname = Some("h1".to_string());
    let original = seed(&store, vec![original]).await.remove(0);

    let draft = server("web-01").with_hostname("h1");
    let mut service = AssetService::new(store.session());
    let (existing, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::detect_only())
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Conflict);
    assert_eq!(existing, original);
    assert_eq!(store.count(&scope).await, 1);
}

/// Session that lets a competing writer commit the same asset just before
/// its own first flush.
struct RacingSession {
    inner: InMemorySession,
    store: InMemoryAssetStore,
    competitor: Option<Asset>,
}

#[async_trait]
impl AssetRecordStore for RacingSession {
    async fn find(&mut self, scope: &TenantScope, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        self.inner.find(scope, filter).await
    }

    fn stage_insert(&mut self, asset: Asset) {
        self.inner.stage_insert(asset);
    }

    fn stage_update(&mut self, asset: Asset) {
        self.inner.stage_update(asset);
    }

    async fn flush(&mut self) -> StoreResult<()> {
        if let Some(competitor) = self.competitor.take() {
            let mut other = self.store.session();
            other.insert(competitor).await?;
            other.commit();
        }
        self.inner.flush().await
    }

    async fn rollback_to_usable(&mut self) -> StoreResult<()> {
        self.inner.rollback_to_usable().await
    }
}

#[tokio::test]
async fn test_scenario_creation_race_resolves_to_existing() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let competitor = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    let competitor_id = competitor.id;

    let mut service = AssetService::new(RacingSession {
        inner: store.session(),
        store: store.clone(),
        competitor: Some(competitor),
    });
    let (asset, status) = service
        .create_or_update(&server("srv1"), &scope, &UpsertOptions::default())
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Existed);
    assert_eq!(asset.id, competitor_id);
    assert_eq!(store.count(&scope).await, 1);
}

#[tokio::test]
async fn test_scenario_creation_race_in_detection_mode_is_conflict() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let competitor = Asset::new(&scope, "srv1".to_string(), AssetType::Server);

    let mut service = AssetService::new(RacingSession {
        inner: store.session(),
        store: store.clone(),
        competitor: Some(competitor.clone()),
    });
    let (asset, status) = service
        .create_or_update(&server("srv1"), &scope, &UpsertOptions::detect_only())
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Conflict);
    assert_eq!(asset.id, competitor.id);
}

#[tokio::test]
async fn test_concurrent_sessions_create_exactly_once() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let draft = server("srv1").with_hostname("h1");
    let options = UpsertOptions::default();

    let mut first = AssetService::new(store.session());
    let mut second = AssetService::new(store.session());
    let (a, b) = tokio::join!(
        first.create_or_update(&draft, &scope, &options),
        second.create_or_update(&draft, &scope, &options),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut statuses = vec![a.1, b.1];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![AssetStatus::Created, AssetStatus::Existed]);
    assert_eq!(a.0.id, b.0.id);
    assert_eq!(store.count(&scope).await, 1);
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn test_enrichment_preserves_present_falsy_values() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut original = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    original.cpu_cores = Some(0);
    original.is_virtual = Some(false);
    original.description = Some(String::new());
    let original = seed(&store, vec![original]).await.remove(0);

    let mut draft = server("srv1");
    draft.cpu_cores = Some(8);
    draft.is_virtual = Some(true);
    draft.description = Some("primary web node".to_string());
    draft.location = Some("dc1".to_string());

    let mut service = AssetService::new(store.session());
    let (updated, _) = service
        .create_or_update(&draft, &scope, &UpsertOptions::upsert(MergeStrategy::Enrich))
        .await
        .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.cpu_cores, Some(0));
    assert_eq!(updated.is_virtual, Some(false));
    assert_eq!(updated.description.as_deref(), Some(""));
    assert_eq!(updated.location.as_deref(), Some("dc1"));
}

#[tokio::test]
async fn test_protected_fields_survive_any_allowlist() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let original = seed(
        &store,
        vec![Asset::new(&scope, "srv1".to_string(), AssetType::Server)],
    )
    .await
    .remove(0);

    let mut draft = server("srv1");
    draft.raw_import_record_id = Some(Uuid::new_v4());
    draft.discovery_flow_id = Some(Uuid::new_v4());
    draft.location = Some("dc2".to_string());

    let options = UpsertOptions {
        field_allowlist: Some(AssetField::ALL.into_iter().collect()),
        ..UpsertOptions::upsert(MergeStrategy::Overwrite)
    };
    let mut service = AssetService::new(store.session());
    let (updated, status) = service
        .create_or_update(&draft, &scope, &options)
        .await
        .unwrap();

    assert_eq!(status, AssetStatus::Updated);
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.client_account_id, original.client_account_id);
    assert_eq!(updated.engagement_id, original.engagement_id);
    assert_eq!(updated.raw_import_record_id, None);
    assert_eq!(updated.discovery_flow_id, None);
    assert_eq!(updated.created_at, original.created_at);
    assert_eq!(updated.location.as_deref(), Some("dc2"));
}

#[tokio::test]
async fn test_padded_identifiers_match_later_records() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut service = AssetService::new(store.session());

    let (created, _) = service
        .create_or_update(
            &server("srv1").with_hostname(" h1 "),
            &scope,
            &UpsertOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created.hostname.as_deref(), Some("h1"));

    let resolved = service
        .resolve(&AssetDraft::named("renamed").with_hostname("h1"), &scope)
        .await
        .unwrap()
        .expect("hostname should match");
    assert_eq!(resolved.asset.id, created.id);
    assert_eq!(resolved.criterion, MatchCriterion::Hostname);
}

#[tokio::test]
async fn test_name_and_type_takes_precedence_over_hostname() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let by_name = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    let mut by_hostname = Asset::new(&scope, "other".to_string(), AssetType::Server);
    by_hostname.hostname = Some("h1".to_string());
    let seeded = seed(&store, vec![by_hostname, by_name]).await;
    let by_name_id = seeded[1].id;

    let draft = server("srv1").with_hostname("h1");
    let mut service = AssetService::new(store.session());

    let resolved = service.resolve(&draft, &scope).await.unwrap().unwrap();
    assert_eq!(resolved.asset.id, by_name_id);
    assert_eq!(resolved.criterion, MatchCriterion::NameAndType);

    let results = service
        .bulk_create_or_update(&[draft], &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].0.id, by_name_id);
}

#[tokio::test]
async fn test_batch_matches_sequential_statuses() {
    fn existing(scope: &TenantScope) -> Vec<Asset> {
        let mut with_host = Asset::new(scope, "legacy-app".to_string(), AssetType::Application);
        with_host.hostname = Some("app-host".to_string());
        let mut with_ip = Asset::new(scope, "core-switch".to_string(), AssetType::NetworkDevice);
        with_ip.ip_address = Some("10.1.0.1".to_string());
        vec![
            Asset::new(scope, "db1".to_string(), AssetType::Database),
            with_host,
            with_ip,
        ]
    }

    let mut drafts = vec![
        AssetDraft::named("db1").with_asset_type(AssetType::Database),
        AssetDraft::named("app-renamed").with_hostname("app-host"),
        AssetDraft::named("switch-b").with_ip_address("10.1.0.1"),
        server("fresh-1").with_hostname("fresh-host-1"),
        server("fresh-2").with_ip_address("10.9.9.9"),
    ];
    drafts[0].location = Some("dc1".to_string());

    for options in [
        UpsertOptions::default(),
        UpsertOptions::upsert(MergeStrategy::Enrich),
        UpsertOptions::detect_only(),
    ] {
        let sequential_store = InMemoryAssetStore::new();
        let batch_store = InMemoryAssetStore::new();
        let scope = test_scope();
        seed(&sequential_store, existing(&scope)).await;
        seed(&batch_store, existing(&scope)).await;

        let mut sequential = AssetService::new(sequential_store.session());
        let mut expected = Vec::new();
        for draft in &drafts {
            let (asset, status) = sequential
                .create_or_update(draft, &scope, &options)
                .await
                .unwrap();
            expected.push((asset.name, status));
        }

        let mut batch = AssetService::new(batch_store.session());
        let actual: Vec<_> = batch
            .bulk_create_or_update(&drafts, &scope, &options)
            .await
            .unwrap()
            .into_iter()
            .map(|(asset, status)| (asset.name, status))
            .collect();

        assert_eq!(actual, expected, "options: {:?}", options);
        assert_eq!(
            batch_store.count(&scope).await,
            sequential_store.count(&scope).await
        );
    }
}

#[tokio::test]
async fn test_chunked_conflict_detection_matches_unchunked() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let existing: Vec<Asset> = (0..25)
        .map(|i| {
            let mut asset = Asset::new(&scope, format!("node-{i:02}"), AssetType::Server);
            asset.hostname = Some(format!("host-{i:02}"));
            asset.ip_address = Some(format!("10.0.0.{i}"));
            asset
        })
        .collect();
    seed(&store, existing).await;

    let drafts: Vec<AssetDraft> = (0..40)
        .map(|i| match i % 4 {
            0 => server(&format!("node-{:02}", i % 25)),
            1 => server(&format!("new-{i}")).with_hostname(format!("host-{:02}", i % 25)),
            2 => server(&format!("new-{i}")).with_ip_address(format!("10.0.0.{}", i % 25)),
            _ => server(&format!("new-{i}")).with_hostname(format!("unknown-{i}")),
        })
        .collect();

    let chunked_config = DedupConfig {
        max_predicate_size: 3,
        ..Default::default()
    };
    let mut chunked = AssetService::with_config(store.session(), &chunked_config).unwrap();
    let mut unchunked = AssetService::new(store.session());

    let before = store.query_count();
    let chunked_report = chunked
        .prepare_conflicts(drafts.clone(), &scope)
        .await
        .unwrap();
    let chunked_queries = store.query_count() - before;

    let before = store.query_count();
    let unchunked_report = unchunked.prepare_conflicts(drafts, &scope).await.unwrap();
    let unchunked_queries = store.query_count() - before;

    assert_eq!(chunked_report, unchunked_report);
    assert_eq!(unchunked_report.conflicts.len(), 30);
    assert_eq!(unchunked_report.conflict_free.len(), 10);
    assert!(chunked_queries > unchunked_queries);
}

#[tokio::test]
async fn test_soft_deleted_asset_never_blocks_creation() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut deleted = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
    deleted.hostname = Some("h1".to_string());
    deleted.ip_address = Some("10.0.0.1".to_string());
    let deleted = seed(&store, vec![deleted]).await.remove(0);
    assert!(store.soft_delete(deleted.id).await);

    let draft = server("srv1")
        .with_hostname("h1")
        .with_ip_address("10.0.0.1");

    let mut service = AssetService::new(store.session());
    let report = service
        .prepare_conflicts(vec![draft.clone()], &scope)
        .await
        .unwrap();
    assert!(!report.has_conflicts());

    let (created, status) = service
        .create_or_update(&draft, &scope, &UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Created);
    assert_ne!(created.id, deleted.id);
    assert_eq!(store.count(&scope).await, 1);
}

#[tokio::test]
async fn test_scopes_never_see_each_other() {
    let store = InMemoryAssetStore::new();
    let first = test_scope();
    let second = test_scope();
    let draft = server("srv1").with_hostname("h1");

    let mut service = AssetService::new(store.session());
    let (a, status_a) = service
        .create_or_update(&draft, &first, &UpsertOptions::default())
        .await
        .unwrap();
    let (b, status_b) = service
        .create_or_update(&draft, &second, &UpsertOptions::default())
        .await
        .unwrap();

    assert_eq!(status_a, AssetStatus::Created);
    assert_eq!(status_b, AssetStatus::Created);
    assert_ne!(a.id, b.id);
    assert_eq!(store.count(&first).await, 1);
    assert_eq!(store.count(&second).await, 1);
}

#[tokio::test]
async fn test_caller_rollback_discards_ingested_assets() {
    let store = InMemoryAssetStore::new();
    let scope = test_scope();
    let mut service = AssetService::new(store.session());

    service
        .bulk_create_or_update(
            &[server("srv1"), server("srv2")],
            &scope,
            &UpsertOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(store.count(&scope).await, 2);

    service.into_store().rollback().await;
    assert_eq!(store.count(&scope).await, 0);
}
