//! In-memory record store.
//!
//! A shared, tenant-partitioned asset table with the same constraint surface as
//! the SQL schema: a partial unique index on `(client_account_id,
//! engagement_id, name)` over live rows and a non-empty `name` check. Sessions
//! stage writes and apply them atomically on flush. Flushed writes are visible
//! to other sessions immediately; [`InMemorySession::rollback`] undoes them.

use super::{
    sort_by_creation, AssetFilter, AssetRecordStore, PendingWrite, StoreError, StoreResult,
    DEFAULT_MAX_PREDICATE_SIZE,
};
use crate::models::asset::timestamp_now;
use crate::models::Asset;
use crate::scope::TenantScope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Shared in-memory asset table.
#[derive(Clone)]
pub struct InMemoryAssetStore {
    assets: Arc<RwLock<HashMap<Uuid, Asset>>>,
    queries: Arc<AtomicUsize>,
    max_predicate_size: usize,
}

impl InMemoryAssetStore {
    /// Creates a new empty in-memory asset store.
    pub fn new() -> Self {
        Self {
            assets: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(AtomicUsize::new(0)),
            max_predicate_size: DEFAULT_MAX_PREDICATE_SIZE,
        }
    }

    /// Sets the largest IN-list a single read may carry.
    pub fn with_max_predicate_size(mut self, max_predicate_size: usize) -> Self {
        self.max_predicate_size = max_predicate_size.max(1);
        self
    }

    /// Opens a new session over the shared table.
    pub fn session(&self) -> InMemorySession {
        InMemorySession {
            store: self.clone(),
            pending: Vec::new(),
            undo: Vec::new(),
        }
    }

    /// Number of reads issued by all sessions so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of live assets in a scope.
    pub async fn count(&self, scope: &TenantScope) -> usize {
        let assets = self.assets.read().await;
        assets
            .values()
            .filter(|a| scope.contains(a) && !a.is_deleted())
            .count()
    }

    /// Looks up an asset by id, including soft-deleted rows.
    pub async fn get(&self, id: Uuid) -> Option<Asset> {
        self.assets.read().await.get(&id).cloned()
    }

    /// Copy of every row in the table.
    pub async fn snapshot(&self) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self.assets.read().await.values().cloned().collect();
        sort_by_creation(&mut assets);
        assets
    }

    /// Marks an asset as deleted. Returns false if the id is unknown.
    pub async fn soft_delete(&self, id: Uuid) -> bool {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&id) {
            Some(asset) => {
                asset.deleted_at = Some(timestamp_now());
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work over an [`InMemoryAssetStore`].
pub struct InMemorySession {
    store: InMemoryAssetStore,
    pending: Vec<PendingWrite>,
    /// Previous row state for every write flushed by this session.
    undo: Vec<(Uuid, Option<Asset>)>,
}

impl InMemorySession {
    /// Number of writes staged but not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Keeps every flushed write.
    pub fn commit(mut self) {
        debug!(writes = self.undo.len(), "Committing in-memory session");
        self.undo.clear();
    }

    /// Undoes every write flushed by this session and drops staged writes.
    pub async fn rollback(mut self) {
        self.pending.clear();
        let mut assets = self.store.assets.write().await;
        revert(&mut assets, std::mem::take(&mut self.undo));
    }
}

fn revert(assets: &mut HashMap<Uuid, Asset>, undo: Vec<(Uuid, Option<Asset>)>) {
    for (id, previous) in undo.into_iter().rev() {
        match previous {
            Some(asset) => {
                assets.insert(id, asset);
            }
            None => {
                assets.remove(&id);
            }
        }
    }
}

fn check_constraints(assets: &HashMap<Uuid, Asset>, asset: &Asset) -> StoreResult<()> {
    if asset.client_account_id.is_nil() || asset.engagement_id.is_nil() {
        return Err(StoreError::IntegrityViolation(
            "NOT NULL constraint failed: assets.client_account_id, assets.engagement_id"
                .to_string(),
        ));
    }
    if asset.name.trim().is_empty() {
        return Err(StoreError::IntegrityViolation(
            "CHECK constraint failed: assets.name must not be empty".to_string(),
        ));
    }
    if asset.is_deleted() {
        return Ok(());
    }
    let duplicate = assets.values().any(|other| {
        other.id != asset.id
            && !other.is_deleted()
            && other.client_account_id == asset.client_account_id
            && other.engagement_id == asset.engagement_id
            && other.name == asset.name
    });
    if duplicate {
        return Err(StoreError::UniqueViolation(format!(
            "UNIQUE constraint failed: assets.client_account_id, assets.engagement_id, assets.name ({})",
            asset.name
        )));
    }
    Ok(())
}

fn apply(assets: &mut HashMap<Uuid, Asset>, write: &PendingWrite) -> StoreResult<Option<Asset>> {
    let asset = write.asset();
    match write {
        PendingWrite::Insert(_) if assets.contains_key(&asset.id) => {
            return Err(StoreError::UniqueViolation(format!(
                "UNIQUE constraint failed: assets.id ({})",
                asset.id
            )));
        }
        PendingWrite::Update(_) if !assets.contains_key(&asset.id) => {
            return Err(StoreError::Query(format!("Asset {} not found", asset.id)));
        }
        _ => {}
    }
    check_constraints(assets, asset)?;
    Ok(assets.insert(asset.id, asset.clone()))
}

#[async_trait]
impl AssetRecordStore for InMemorySession {
    async fn find(&mut self, scope: &TenantScope, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        self.store.queries.fetch_add(1, Ordering::SeqCst);
        if filter.predicate_size() > self.store.max_predicate_size {
            return Err(StoreError::Query(format!(
                "Predicate of {} values exceeds the limit of {}",
                filter.predicate_size(),
                self.store.max_predicate_size
            )));
        }

        let assets = self.store.assets.read().await;
        let mut results: Vec<Asset> = assets
            .values()
            .filter(|a| scope.contains(a) && !a.is_deleted())
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        sort_by_creation(&mut results);
        Ok(results)
    }

    fn stage_insert(&mut self, asset: Asset) {
        self.pending.push(PendingWrite::Insert(asset));
    }

    fn stage_update(&mut self, asset: Asset) {
        self.pending.push(PendingWrite::Update(asset));
    }

    async fn flush(&mut self) -> StoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let mut assets = self.store.assets.write().await;
        let mut applied = Vec::with_capacity(pending.len());
        for write in &pending {
            match apply(&mut assets, write) {
                Ok(previous) => applied.push((write.asset().id, previous)),
                Err(err) => {
                    revert(&mut assets, applied);
                    return Err(err);
                }
            }
        }

        debug!(writes = applied.len(), "Flushed staged asset writes");
        self.undo.extend(applied);
        Ok(())
    }

    async fn rollback_to_usable(&mut self) -> StoreResult<()> {
        self.pending.clear();
        Ok(())
    }

    fn max_predicate_size(&self) -> usize {
        self.store.max_predicate_size
    }
}
