//! Ingestion service: the single entry point for creating or updating assets.
//!
//! [`AssetService::create_or_update`] composes identity resolution and merging
//! and recovers from creation races. When an insert hits the tenant-scoped
//! name constraint, another writer may have created the same asset first; the
//! service rolls the session back to a usable state and resolves exactly once
//! more. Any other integrity violation, or a second miss, is returned to the
//! caller unchanged.
//!
//! The service only stages and flushes. Committing is the caller's job.

use crate::config::DedupConfig;
use crate::conflicts::{ConflictDetector, ConflictReport};
use crate::error::{DedupError, DedupResult};
use crate::field_policy::{FieldPolicy, FieldSet};
use crate::merge::{MergeEngine, MergeStrategy};
use crate::models::{Asset, AssetDraft};
use crate::resolver::{IdentityResolver, ResolvedAsset};
use crate::scope::TenantScope;
use crate::store::{AssetRecordStore, StoreError, DEFAULT_MAX_PREDICATE_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Outcome of ingesting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    /// A new asset was inserted.
    Created,
    /// A matching asset exists and was returned unchanged.
    Existed,
    /// A matching asset was merged with the record.
    Updated,
    /// A matching asset exists and the caller asked for detection only.
    Conflict,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Created => "created",
            AssetStatus::Existed => "existed",
            AssetStatus::Updated => "updated",
            AssetStatus::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call ingestion options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOptions {
    /// Merge into a matched asset instead of returning it unchanged.
    pub allow_upsert: bool,
    /// Strategy used when merging.
    pub merge_strategy: MergeStrategy,
    /// Report matches as conflicts and never write to them.
    pub conflict_detection_only: bool,
    /// Fields a merge may touch; the policy's mergeable set when `None`.
    pub field_allowlist: Option<FieldSet>,
}

impl UpsertOptions {
    pub fn upsert(merge_strategy: MergeStrategy) -> Self {
        Self {
            allow_upsert: true,
            merge_strategy,
            ..Default::default()
        }
    }

    pub fn detect_only() -> Self {
        Self {
            conflict_detection_only: true,
            ..Default::default()
        }
    }
}

/// Steps of the create path after a resolution miss.
#[derive(Debug)]
enum CreationState {
    AttemptInsert,
    RollbackToUsable(StoreError),
    RetryResolutionOnce(StoreError),
    ResolveAsExisting(Asset),
    PropagateUnrecoverable(StoreError),
}

/// Resolves, merges and creates assets over an injected record store.
pub struct AssetService<S> {
    pub(crate) store: S,
    pub(crate) resolver: IdentityResolver,
    pub(crate) detector: ConflictDetector,
    pub(crate) merger: MergeEngine,
}

impl<S: AssetRecordStore> AssetService<S> {
    /// Creates a service with the standard field policy and default limits.
    pub fn new(store: S) -> Self {
        let policy = FieldPolicy::standard();
        Self {
            store,
            resolver: IdentityResolver::new(),
            detector: ConflictDetector::new(policy, DEFAULT_MAX_PREDICATE_SIZE),
            merger: MergeEngine::new(policy),
        }
    }

    /// Creates a service from configuration, validating it against the
    /// standard field policy.
    pub fn with_config(store: S, config: &DedupConfig) -> DedupResult<Self> {
        Self::with_policy(store, FieldPolicy::standard(), config)
    }

    /// Creates a service with a custom field policy.
    pub fn with_policy(store: S, policy: FieldPolicy, config: &DedupConfig) -> DedupResult<Self> {
        policy.validate()?;
        config.validate(&policy)?;
        Ok(Self {
            store,
            resolver: IdentityResolver::new(),
            detector: ConflictDetector::new(policy, config.max_predicate_size),
            merger: MergeEngine::new(policy),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Returns the store so the caller can commit or roll back.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn policy(&self) -> &FieldPolicy {
        self.merger.policy()
    }

    /// Runs identity resolution for one record.
    pub async fn resolve(
        &mut self,
        draft: &AssetDraft,
        scope: &TenantScope,
    ) -> DedupResult<Option<ResolvedAsset>> {
        self.resolver.resolve(&mut self.store, draft, scope).await
    }

    /// Classifies a batch into conflict-free records and conflicts.
    pub async fn prepare_conflicts(
        &mut self,
        drafts: Vec<AssetDraft>,
        scope: &TenantScope,
    ) -> DedupResult<ConflictReport> {
        self.detector
            .prepare_conflicts(&mut self.store, drafts, scope)
            .await
    }

    /// Creates a new asset or resolves `draft` to an existing one.
    ///
    /// | match found | detection only | upsert | result                 |
    /// |-------------|----------------|--------|------------------------|
    /// | yes         | yes            | any    | `(existing, conflict)` |
    /// | yes         | no             | no     | `(existing, existed)`  |
    /// | yes         | no             | yes    | `(merged, updated)`    |
    /// | no          | any            | any    | `(new, created)`       |
    ///
    /// A uniqueness violation on insert triggers one more resolution; a hit
    /// returns `existed` (or `conflict` in detection-only mode) without
    /// merging.
    #[instrument(skip(self, draft, options), fields(scope = %scope, name = ?draft.name()))]
    pub async fn create_or_update(
        &mut self,
        draft: &AssetDraft,
        scope: &TenantScope,
        options: &UpsertOptions,
    ) -> DedupResult<(Asset, AssetStatus)> {
        scope.validate()?;
        self.warn_on_protected_allowlist(options);

        if let Some(resolved) = self.resolver.resolve(&mut self.store, draft, scope).await? {
            let existing = resolved.asset;
            if options.conflict_detection_only {
                info!(asset_id = %existing.id, criterion = %resolved.criterion, "Conflict detected");
                return Ok((existing, AssetStatus::Conflict));
            }
            if !options.allow_upsert {
                debug!(asset_id = %existing.id, "Asset already exists");
                return Ok((existing, AssetStatus::Existed));
            }
            let updated = self.merge_existing(existing, draft, options).await?;
            return Ok((updated, AssetStatus::Updated));
        }

        self.create(draft, scope, options).await
    }

    pub(crate) fn warn_on_protected_allowlist(&self, options: &UpsertOptions) {
        if let Some(allowlist) = &options.field_allowlist {
            let protected = allowlist.intersection(&self.policy().protected());
            if !protected.is_empty() {
                warn!(fields = ?protected, "Ignoring protected fields in merge allowlist");
            }
        }
    }

    async fn merge_existing(
        &mut self,
        mut existing: Asset,
        draft: &AssetDraft,
        options: &UpsertOptions,
    ) -> DedupResult<Asset> {
        let outcome = self.merger.merge(
            options.merge_strategy,
            &mut existing,
            draft,
            options.field_allowlist.as_ref(),
        )?;
        self.store.stage_update(existing.clone());
        if let Err(err) = self.store.flush().await {
            warn!(asset_id = %existing.id, error = %err, "Flushing merged asset failed");
            self.store.rollback_to_usable().await?;
            return Err(err.into());
        }
        info!(
            asset_id = %existing.id,
            strategy = %options.merge_strategy,
            changed = outcome.changed.len(),
            "Asset updated"
        );
        Ok(existing)
    }

    async fn create(
        &mut self,
        draft: &AssetDraft,
        scope: &TenantScope,
        options: &UpsertOptions,
    ) -> DedupResult<(Asset, AssetStatus)> {
        let mut state = CreationState::AttemptInsert;
        loop {
            state = match state {
                CreationState::AttemptInsert => {
                    match self.store.insert(Asset::from_draft(scope, draft)).await {
                        Ok(asset) => {
                            info!(asset_id = %asset.id, "Asset created");
                            return Ok((asset, AssetStatus::Created));
                        }
                        Err(err) if err.is_integrity_violation() => {
                            CreationState::RollbackToUsable(err)
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                CreationState::RollbackToUsable(err) => {
                    self.store.rollback_to_usable().await?;
                    if err.is_unique_violation() {
                        CreationState::RetryResolutionOnce(err)
                    } else {
                        CreationState::PropagateUnrecoverable(err)
                    }
                }
                CreationState::RetryResolutionOnce(err) => {
                    info!(error = %err, "Uniqueness violation on insert, resolving once more");
                    match self.resolver.resolve(&mut self.store, draft, scope).await? {
                        Some(resolved) => CreationState::ResolveAsExisting(resolved.asset),
                        None => CreationState::PropagateUnrecoverable(err),
                    }
                }
                CreationState::ResolveAsExisting(existing) => {
                    let status = if options.conflict_detection_only {
                        AssetStatus::Conflict
                    } else {
                        AssetStatus::Existed
                    };
                    info!(asset_id = %existing.id, %status, "Recovered from concurrent creation");
                    return Ok((existing, status));
                }
                CreationState::PropagateUnrecoverable(err) => {
                    warn!(error = %err, "Unrecoverable integrity violation on insert");
                    return Err(DedupError::Store(err));
                }
            };
        }
    }
}
