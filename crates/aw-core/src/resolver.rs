//! Identity resolution for a single incoming record.
//!
//! Lookup is hierarchical: the first check that finds a live asset in the
//! tenant scope wins.
//!
//! 1. `name` and `asset_type` both equal
//! 2. `hostname`, `fully_qualified_domain_name` or `ip_address` equal (one OR query)
//! 3. normalized name as a case-insensitive substring of an existing name
//! 4. import identifier, as a column or inside `import_metadata`
//!
//! Each check issues its own scoped read; nothing is cached between calls.

use crate::error::DedupResult;
use crate::models::{Asset, AssetDraft};
use crate::scope::TenantScope;
use crate::store::{AssetFilter, AssetRecordStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Which identifier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriterion {
    NameAndType,
    Hostname,
    Fqdn,
    IpAddress,
    NormalizedName,
    ExternalId,
    /// Name alone; only used by batch processing.
    Name,
}

impl MatchCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCriterion::NameAndType => "name_and_type",
            MatchCriterion::Hostname => "hostname",
            MatchCriterion::Fqdn => "fqdn",
            MatchCriterion::IpAddress => "ip_address",
            MatchCriterion::NormalizedName => "normalized_name",
            MatchCriterion::ExternalId => "external_id",
            MatchCriterion::Name => "name",
        }
    }
}

impl std::fmt::Display for MatchCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing asset together with the criterion that matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub asset: Asset,
    pub criterion: MatchCriterion,
}

/// Finds the existing asset an incoming record refers to. Read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `draft` against live assets in `scope`.
    ///
    /// Returns `None` when no check matches. Store errors propagate.
    #[instrument(skip(self, store, draft), fields(scope = %scope, name = ?draft.name()))]
    pub async fn resolve<S>(
        &self,
        store: &mut S,
        draft: &AssetDraft,
        scope: &TenantScope,
    ) -> DedupResult<Option<ResolvedAsset>>
    where
        S: AssetRecordStore + ?Sized,
    {
        scope.validate()?;

        if let Some(name) = draft.name() {
            let filter = AssetFilter::NameAndType {
                name: name.to_string(),
                asset_type: draft.asset_type_or_default(),
            };
            if let Some(asset) = first(store, scope, &filter).await? {
                return Ok(Some(matched(asset, MatchCriterion::NameAndType)));
            }
        }

        let hostname = draft.hostname().map(str::to_string);
        let fqdn = draft.fqdn().map(str::to_string);
        let ip_address = draft.ip_address().map(str::to_string);
        if hostname.is_some() || fqdn.is_some() || ip_address.is_some() {
            let filter = AssetFilter::AnyIdentifier {
                hostname: hostname.clone(),
                fqdn: fqdn.clone(),
                ip_address: ip_address.clone(),
            };
            if let Some(asset) = first(store, scope, &filter).await? {
                let criterion = if hostname.is_some() && asset.hostname == hostname {
                    MatchCriterion::Hostname
                } else if fqdn.is_some() && asset.fully_qualified_domain_name == fqdn {
                    MatchCriterion::Fqdn
                } else {
                    MatchCriterion::IpAddress
                };
                return Ok(Some(matched(asset, criterion)));
            }
        }

        if let Some(normalized) = draft.normalized_name().filter(|n| !n.is_empty()) {
            let filter = AssetFilter::NameContains(normalized);
            if let Some(asset) = first(store, scope, &filter).await? {
                return Ok(Some(matched(asset, MatchCriterion::NormalizedName)));
            }
        }

        if let Some(external_id) = draft.import_identifier() {
            let filter = AssetFilter::ExternalId(external_id);
            if let Some(asset) = first(store, scope, &filter).await? {
                return Ok(Some(matched(asset, MatchCriterion::ExternalId)));
            }
        }

        debug!("No existing asset matched");
        Ok(None)
    }
}

async fn first<S>(
    store: &mut S,
    scope: &TenantScope,
    filter: &AssetFilter,
) -> DedupResult<Option<Asset>>
where
    S: AssetRecordStore + ?Sized,
{
    Ok(store.find(scope, filter).await?.into_iter().next())
}

fn matched(asset: Asset, criterion: MatchCriterion) -> ResolvedAsset {
    debug!(asset_id = %asset.id, criterion = %criterion, "Resolved existing asset");
    ResolvedAsset { asset, criterion }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DedupError;
    use crate::models::AssetType;
    use crate::store::InMemoryAssetStore;
    use uuid::Uuid;

    fn scope() -> TenantScope {
        TenantScope::new(Uuid::new_v4(), Uuid::new_v4()).unwrap()
    }

    async fn seed(store: &InMemoryAssetStore, asset: Asset) -> Asset {
        let mut session = store.session();
        let asset = session.insert(asset).await.unwrap();
        session.commit();
        asset
    }

    #[tokio::test]
    async fn test_name_and_type_wins_over_hostname() {
        let store = InMemoryAssetStore::new();
        let scope = scope();

        let mut by_host = Asset::new(&scope, "other".to_string(), AssetType::Server);
        by_host.hostname = Some("h1".to_string());
        seed(&store, by_host).await;
        let by_name = seed(
            &store,
            Asset::new(&scope, "srv1".to_string(), AssetType::Server),
        )
        .await;

        let draft = AssetDraft::named("srv1")
            .with_asset_type(AssetType::Server)
            .with_hostname("h1");
        let mut session = store.session();
        let resolved = IdentityResolver::new()
            .resolve(&mut session, &draft, &scope)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.asset.id, by_name.id);
        assert_eq!(resolved.criterion, MatchCriterion::NameAndType);
    }

    #[tokio::test]
    async fn test_identifier_or_query_labels_matching_field() {
        let store = InMemoryAssetStore::new();
        let scope = scope();
        let mut existing = Asset::new(&scope, "db-01".to_string(), AssetType::Database);
        existing.ip_address = Some("10.0.0.5".to_string());
        seed(&store, existing).await;

        let draft = AssetDraft::named("unrelated")
            .with_hostname("nope")
            .with_ip_address("10.0.0.5");
        let mut session = store.session();
        let resolved = IdentityResolver::new()
            .resolve(&mut session, &draft, &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.criterion, MatchCriterion::IpAddress);
    }

    #[tokio::test]
    async fn test_normalized_name_fallback() {
        let store = InMemoryAssetStore::new();
        let scope = scope();
        seed(
            &store,
            Asset::new(&scope, "prod-web-server-01".to_string(), AssetType::Server),
        )
        .await;

        let draft = AssetDraft::named("Web Server 01").with_asset_type(AssetType::Application);
        let mut session = store.session();
        let resolved = IdentityResolver::new()
            .resolve(&mut session, &draft, &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.criterion, MatchCriterion::NormalizedName);
    }

    #[tokio::test]
    async fn test_external_id_in_metadata() {
        let store = InMemoryAssetStore::new();
        let scope = scope();
        let mut existing = Asset::new(&scope, "alpha".to_string(), AssetType::Server);
        existing.import_metadata = Some(serde_json::json!({ "external_id": "CMDB-1" }));
        seed(&store, existing).await;

        let mut draft = AssetDraft::named("beta");
        draft.external_id = Some("CMDB-1".to_string());
        let mut session = store.session();
        let resolved = IdentityResolver::new()
            .resolve(&mut session, &draft, &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.criterion, MatchCriterion::ExternalId);
    }

    #[tokio::test]
    async fn test_no_match_and_no_cross_tenant_match() {
        let store = InMemoryAssetStore::new();
        let (mine, theirs) = (scope(), scope());
        seed(
            &store,
            Asset::new(&theirs, "srv1".to_string(), AssetType::Server),
        )
        .await;

        let mut session = store.session();
        let resolved = IdentityResolver::new()
            .resolve(&mut session, &AssetDraft::named("srv1"), &mine)
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_each_check_issues_its_own_query() {
        let store = InMemoryAssetStore::new();
        let scope = scope();
        let mut draft = AssetDraft::named("srv1").with_hostname("h1");
        draft.external_id = Some("X-1".to_string());

        let mut session = store.session();
        IdentityResolver::new()
            .resolve(&mut session, &draft, &scope)
            .await
            .unwrap();
        assert_eq!(store.query_count(), 4);
    }

    #[tokio::test]
    async fn test_nil_scope_is_rejected_before_any_query() {
        let store = InMemoryAssetStore::new();
        let scope = TenantScope {
            client_account_id: Uuid::nil(),
            engagement_id: Uuid::new_v4(),
        };
        let mut session = store.session();
        let err = IdentityResolver::new()
            .resolve(&mut session, &AssetDraft::named("srv1"), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::MissingTenantScope(_)));
        assert_eq!(store.query_count(), 0);
    }
}
