//! # aw-core
//!
//! Identity resolution and safe field merging for Asset Warden.
//!
//! This crate decides whether an incoming inventory record describes an asset
//! that already exists within a tenant scope, merges new information into it
//! under a field policy, detects conflicts for caller review, and creates new
//! assets safely when concurrent writers race on the same identity.
//!
//! All storage goes through the [`store::AssetRecordStore`] contract. An
//! in-memory implementation is always available; the SQLite implementation
//! sits behind the `database` feature.

pub mod batching;
mod bulk;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod field_policy;
pub mod merge;
pub mod models;
pub mod resolver;
pub mod scope;
pub mod service;
pub mod store;
pub mod summary;

pub use batching::KeyBatcher;
pub use config::DedupConfig;
pub use conflicts::{
    AssetConflict, AssetSnapshot, ConflictDetector, ConflictReport, ConflictType, IdentifierKind,
    PrefetchIndex,
};
pub use error::{DedupError, DedupResult};
pub use field_policy::{
    AssetField, FieldError, FieldKind, FieldPolicy, FieldPolicyError, FieldSet, FieldValue,
    MERGEABLE_FIELDS, NEVER_MERGE_FIELDS, SNAPSHOT_FIELDS,
};
pub use merge::{MergeEngine, MergeOutcome, MergeStrategy};
pub use models::{Asset, AssetDraft, AssetType, Criticality, Environment};
pub use resolver::{IdentityResolver, MatchCriterion, ResolvedAsset};
pub use scope::{ScopeError, TenantScope};
pub use service::{AssetService, AssetStatus, UpsertOptions};
pub use store::{
    AssetFilter, AssetRecordStore, InMemoryAssetStore, InMemorySession, PendingWrite, StoreError,
    StoreResult,
};
pub use summary::IngestSummary;

#[cfg(feature = "database")]
pub use store::{create_pool, SqliteAssetSession, SqliteAssetStore};
