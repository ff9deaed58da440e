//! Record store contract.
//!
//! Identity resolution, conflict detection and merging only ever talk to an
//! [`AssetRecordStore`]: a session-scoped handle offering tenant-filtered reads,
//! staged writes, a flush that surfaces constraint violations, and a local
//! rollback that keeps the session usable after a caught error. Committing or
//! rolling back the enclosing transaction is the caller's business.

pub mod error;
pub mod memory;

#[cfg(feature = "database")]
pub mod pool;
#[cfg(feature = "database")]
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryAssetStore, InMemorySession};

#[cfg(feature = "database")]
pub use pool::{create_pool, create_pool_with_options, escape_like_pattern, PoolOptions};
#[cfg(feature = "database")]
pub use sqlite::{SqliteAssetSession, SqliteAssetStore};

use crate::models::asset::metadata_external_id;
use crate::models::{Asset, AssetType};
use crate::scope::TenantScope;
use async_trait::async_trait;

/// Default upper bound on the number of values in one IN-list predicate.
pub const DEFAULT_MAX_PREDICATE_SIZE: usize = 500;

/// A tenant-scoped read filter.
///
/// Every filter is applied on top of the scope and the soft-delete exclusion;
/// there is no way to express a cross-tenant or deleted-row read.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetFilter {
    /// `name` and `asset_type` both equal.
    NameAndType { name: String, asset_type: AssetType },
    /// Any of the supplied identifiers equal (absent identifiers are ignored).
    AnyIdentifier {
        hostname: Option<String>,
        fqdn: Option<String>,
        ip_address: Option<String>,
    },
    /// Case-insensitive substring match on `name`.
    NameContains(String),
    /// Case-insensitive substring match on `name` against any of the needles.
    NameContainsAny(Vec<String>),
    /// `external_id` column or `import_metadata.external_id` equal.
    ExternalId(String),
    NameIn(Vec<String>),
    HostnameIn(Vec<String>),
    FqdnIn(Vec<String>),
    IpAddressIn(Vec<String>),
    ExternalIdIn(Vec<String>),
}

impl AssetFilter {
    /// Evaluates the filter against a single asset, ignoring scope.
    pub fn matches(&self, asset: &Asset) -> bool {
        fn eq(column: &Option<String>, value: &Option<String>) -> bool {
            matches!((column, value), (Some(c), Some(v)) if c == v)
        }
        fn member(column: &Option<String>, values: &[String]) -> bool {
            column.as_ref().is_some_and(|c| values.contains(c))
        }

        match self {
            AssetFilter::NameAndType { name, asset_type } => {
                &asset.name == name && &asset.asset_type == asset_type
            }
            AssetFilter::AnyIdentifier {
                hostname,
                fqdn,
                ip_address,
            } => {
                eq(&asset.hostname, hostname)
                    || eq(&asset.fully_qualified_domain_name, fqdn)
                    || eq(&asset.ip_address, ip_address)
            }
            AssetFilter::NameContains(needle) => asset
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            AssetFilter::NameContainsAny(needles) => {
                let name = asset.name.to_lowercase();
                needles.iter().any(|n| name.contains(&n.to_lowercase()))
            }
            AssetFilter::ExternalId(value) => {
                asset.external_id.as_ref() == Some(value)
                    || metadata_external_id(asset.import_metadata.as_ref()).as_ref() == Some(value)
            }
            AssetFilter::NameIn(names) => names.contains(&asset.name),
            AssetFilter::HostnameIn(values) => member(&asset.hostname, values),
            AssetFilter::FqdnIn(values) => member(&asset.fully_qualified_domain_name, values),
            AssetFilter::IpAddressIn(values) => member(&asset.ip_address, values),
            AssetFilter::ExternalIdIn(values) => {
                member(&asset.external_id, values)
                    || metadata_external_id(asset.import_metadata.as_ref())
                        .is_some_and(|id| values.contains(&id))
            }
        }
    }

    /// Number of bound values the filter places in a single predicate.
    pub fn predicate_size(&self) -> usize {
        match self {
            AssetFilter::NameAndType { .. }
            | AssetFilter::NameContains(_)
            | AssetFilter::ExternalId(_) => 1,
            AssetFilter::AnyIdentifier {
                hostname,
                fqdn,
                ip_address,
            } => [hostname, fqdn, ip_address]
                .iter()
                .filter(|v| v.is_some())
                .count(),
            AssetFilter::NameContainsAny(values)
            | AssetFilter::NameIn(values)
            | AssetFilter::HostnameIn(values)
            | AssetFilter::FqdnIn(values)
            | AssetFilter::IpAddressIn(values)
            | AssetFilter::ExternalIdIn(values) => values.len(),
        }
    }
}

/// A write staged in a session and applied on the next flush.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Insert(Asset),
    Update(Asset),
}

impl PendingWrite {
    pub fn asset(&self) -> &Asset {
        match self {
            PendingWrite::Insert(asset) | PendingWrite::Update(asset) => asset,
        }
    }
}

/// A unit-of-work handle over the asset table.
///
/// Reads are always restricted to `scope` and exclude soft-deleted rows, and
/// return matches ordered by `(created_at, id)`. Writes are staged and only
/// reach the store on [`flush`](Self::flush), which is all-or-nothing and
/// reports uniqueness violations distinctly from other integrity violations.
#[async_trait]
pub trait AssetRecordStore: Send {
    /// Tenant-scoped filtered read.
    async fn find(&mut self, scope: &TenantScope, filter: &AssetFilter) -> StoreResult<Vec<Asset>>;

    /// Stages a new asset.
    fn stage_insert(&mut self, asset: Asset);

    /// Stages an in-place update of an existing asset.
    fn stage_update(&mut self, asset: Asset);

    /// Applies all staged writes without finalizing the transaction.
    ///
    /// On failure nothing staged since the last successful flush is applied.
    async fn flush(&mut self) -> StoreResult<()>;

    /// Discards staged writes and any partial flush state so the session
    /// remains usable after a caught error.
    async fn rollback_to_usable(&mut self) -> StoreResult<()>;

    /// Stages and flushes a single new asset.
    async fn insert(&mut self, asset: Asset) -> StoreResult<Asset> {
        self.stage_insert(asset.clone());
        self.flush().await?;
        Ok(asset)
    }

    /// Largest number of values the store accepts in one IN-list predicate.
    fn max_predicate_size(&self) -> usize {
        DEFAULT_MAX_PREDICATE_SIZE
    }
}

pub(crate) fn sort_by_creation(assets: &mut [Asset]) {
    assets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn asset(name: &str) -> Asset {
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        Asset::new(&scope, name.to_string(), AssetType::Server)
    }

    #[test]
    fn test_any_identifier_ignores_absent_values() {
        let mut a = asset("srv1");
        a.hostname = Some("h1".to_string());

        let filter = AssetFilter::AnyIdentifier {
            hostname: None,
            fqdn: None,
            ip_address: Some("10.0.0.1".to_string()),
        };
        assert!(!filter.matches(&a));

        let filter = AssetFilter::AnyIdentifier {
            hostname: Some("h1".to_string()),
            fqdn: None,
            ip_address: Some("10.0.0.1".to_string()),
        };
        assert!(filter.matches(&a));
        assert_eq!(filter.predicate_size(), 2);
    }

    #[test]
    fn test_name_contains_is_case_insensitive() {
        let a = asset("PROD-Web-Server-01");
        assert!(AssetFilter::NameContains("web-server".to_string()).matches(&a));
        assert!(!AssetFilter::NameContains("db".to_string()).matches(&a));
        assert!(AssetFilter::NameContainsAny(vec!["db".into(), "SERVER-01".into()]).matches(&a));
    }

    #[test]
    fn test_external_id_matches_metadata() {
        let mut a = asset("srv1");
        a.import_metadata = Some(serde_json::json!({ "external_id": "CMDB-9" }));
        assert!(AssetFilter::ExternalId("CMDB-9".to_string()).matches(&a));
        assert!(AssetFilter::ExternalIdIn(vec!["x".into(), "CMDB-9".into()]).matches(&a));
    }

    #[test]
    fn test_sort_by_creation() {
        let mut first = asset("a");
        let mut second = asset("b");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        first.id = Uuid::from_u128(2);
        let mut assets = vec![second.clone(), first.clone()];
        sort_by_creation(&mut assets);
        assert_eq!(assets[0].name, "a");
    }
}
