//! Batch conflict detection.
//!
//! Existing assets that could collide with any record in a batch are fetched
//! up front, one chunked query set per identifier kind, into a
//! [`PrefetchIndex`]. Records are then classified against the index without
//! further reads. Nothing here writes to the store.
//!
//! Matching deliberately ignores `environment`: two unrelated assets sharing an
//! environment label are not the same asset.

use crate::batching::KeyBatcher;
use crate::error::DedupResult;
use crate::field_policy::FieldPolicy;
use crate::models::{Asset, AssetDraft, AssetType};
use crate::scope::TenantScope;
use crate::store::{sort_by_creation, AssetFilter, AssetRecordStore, DEFAULT_MAX_PREDICATE_SIZE};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Identifier families the prefetch step can index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// Name; also feeds the `(name, asset_type)` index.
    Name,
    Hostname,
    Fqdn,
    IpAddress,
    ExternalId,
    /// Normalized name, matched as a case-insensitive substring.
    NormalizedName,
}

impl IdentifierKind {
    fn keys(&self, drafts: &[AssetDraft]) -> Vec<String> {
        drafts
            .iter()
            .filter_map(|draft| match self {
                IdentifierKind::Name => draft.name().map(str::to_string),
                IdentifierKind::Hostname => draft.hostname().map(str::to_string),
                IdentifierKind::Fqdn => draft.fqdn().map(str::to_string),
                IdentifierKind::IpAddress => draft.ip_address().map(str::to_string),
                IdentifierKind::ExternalId => draft.import_identifier(),
                IdentifierKind::NormalizedName => draft.normalized_name(),
            })
            .collect()
    }

    fn filter(&self, keys: Vec<String>) -> AssetFilter {
        match self {
            IdentifierKind::Name => AssetFilter::NameIn(keys),
            IdentifierKind::Hostname => AssetFilter::HostnameIn(keys),
            IdentifierKind::Fqdn => AssetFilter::FqdnIn(keys),
            IdentifierKind::IpAddress => AssetFilter::IpAddressIn(keys),
            IdentifierKind::ExternalId => AssetFilter::ExternalIdIn(keys),
            IdentifierKind::NormalizedName => AssetFilter::NameContainsAny(keys),
        }
    }
}

/// In-memory lookup tables over prefetched assets.
///
/// Assets live in an arena; each key maps to the arena slots holding it, in
/// insertion order. Lookups return the earliest holder, so inserting in
/// `(created_at, id)` order mirrors what a scoped query returns first.
#[derive(Debug, Default)]
pub struct PrefetchIndex {
    assets: Vec<Asset>,
    by_id: HashMap<Uuid, usize>,
    by_name: KeyMap<String>,
    by_name_and_type: KeyMap<(String, AssetType)>,
    by_hostname: KeyMap<String>,
    by_fqdn: KeyMap<String>,
    by_ip: KeyMap<String>,
    by_external_id: KeyMap<String>,
}

type KeyMap<K> = HashMap<K, Vec<usize>>;

fn attach<K: Eq + Hash>(map: &mut KeyMap<K>, key: K, slot: usize) {
    let slots = map.entry(key).or_default();
    if let Err(pos) = slots.binary_search(&slot) {
        slots.insert(pos, slot);
    }
}

fn detach<K: Eq + Hash>(map: &mut KeyMap<K>, key: &K, slot: usize) {
    if let Some(slots) = map.get_mut(key) {
        slots.retain(|s| *s != slot);
        if slots.is_empty() {
            map.remove(key);
        }
    }
}

impl PrefetchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an asset. Returns false if an asset with the same id is present.
    pub fn insert(&mut self, asset: Asset) -> bool {
        if self.by_id.contains_key(&asset.id) {
            return false;
        }
        let slot = self.assets.len();
        self.by_id.insert(asset.id, slot);
        self.assets.push(asset);
        self.index_keys(slot, true);
        true
    }

    /// Replaces the stored copy of an asset and re-indexes its keys.
    ///
    /// The asset keeps its position, so it keeps precedence over assets
    /// inserted after it. Unknown assets are inserted.
    pub fn replace(&mut self, asset: Asset) {
        let Some(&slot) = self.by_id.get(&asset.id) else {
            self.insert(asset);
            return;
        };
        self.index_keys(slot, false);
        self.assets[slot] = asset;
        self.index_keys(slot, true);
    }

    fn index_keys(&mut self, slot: usize, add: bool) {
        let asset = &self.assets[slot];
        let mut text_keys: Vec<(&mut KeyMap<String>, String)> = Vec::new();
        let mut name_and_type = None;
        if !asset.name.is_empty() {
            text_keys.push((&mut self.by_name, asset.name.clone()));
            name_and_type = Some((asset.name.clone(), asset.asset_type.clone()));
        }
        if let Some(hostname) = &asset.hostname {
            text_keys.push((&mut self.by_hostname, hostname.clone()));
        }
        if let Some(fqdn) = &asset.fully_qualified_domain_name {
            text_keys.push((&mut self.by_fqdn, fqdn.clone()));
        }
        if let Some(ip) = &asset.ip_address {
            text_keys.push((&mut self.by_ip, ip.clone()));
        }
        if let Some(external_id) = asset.import_identifier() {
            text_keys.push((&mut self.by_external_id, external_id));
        }

        for (map, key) in text_keys {
            if add {
                attach(map, key, slot);
            } else {
                detach(map, &key, slot);
            }
        }
        if let Some(key) = name_and_type {
            if add {
                attach(&mut self.by_name_and_type, key, slot);
            } else {
                detach(&mut self.by_name_and_type, &key, slot);
            }
        }
    }

    fn lookup<'a>(&'a self, map: &KeyMap<String>, key: Option<&str>) -> Option<&'a Asset> {
        let slot = map.get(key?)?.first()?;
        Some(&self.assets[*slot])
    }

    pub fn by_name(&self, name: Option<&str>) -> Option<&Asset> {
        self.lookup(&self.by_name, name)
    }

    pub fn by_name_and_type(&self, name: Option<&str>, asset_type: &AssetType) -> Option<&Asset> {
        let slots = self
            .by_name_and_type
            .get(&(name?.to_string(), asset_type.clone()))?;
        slots.first().map(|&slot| &self.assets[slot])
    }

    pub fn by_hostname(&self, hostname: Option<&str>) -> Option<&Asset> {
        self.lookup(&self.by_hostname, hostname)
    }

    pub fn by_fqdn(&self, fqdn: Option<&str>) -> Option<&Asset> {
        self.lookup(&self.by_fqdn, fqdn)
    }

    pub fn by_ip(&self, ip_address: Option<&str>) -> Option<&Asset> {
        self.lookup(&self.by_ip, ip_address)
    }

    pub fn by_external_id(&self, external_id: Option<&str>) -> Option<&Asset> {
        self.lookup(&self.by_external_id, external_id)
    }

    /// Earliest asset whose lower-cased name contains `needle`.
    pub fn by_name_substring(&self, needle: Option<&str>) -> Option<&Asset> {
        let needle = needle.filter(|n| !n.is_empty())?.to_lowercase();
        self.assets
            .iter()
            .find(|asset| asset.name.to_lowercase().contains(&needle))
    }

    /// Position of an asset in insertion order.
    pub fn position(&self, id: &Uuid) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Why a record was classified as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Name,
    Hostname,
    IpAddress,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictType::Name => write!(f, "name"),
            ConflictType::Hostname => write!(f, "hostname"),
            ConflictType::IpAddress => write!(f, "ip_address"),
        }
    }
}

/// Redacted view of an existing asset: snapshot fields only, `null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AssetSnapshot(BTreeMap<&'static str, serde_json::Value>);

impl AssetSnapshot {
    pub fn capture(asset: &Asset, policy: &FieldPolicy) -> Self {
        let fields = policy
            .snapshot()
            .iter()
            .map(|field| {
                let value = asset
                    .field_value(field)
                    .map(|v| v.to_json())
                    .unwrap_or(serde_json::Value::Null);
                (field.as_str(), value)
            })
            .collect();
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

/// A record that collides with an existing asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetConflict {
    pub conflict_type: ConflictType,
    pub conflict_key: String,
    pub existing_asset_id: Uuid,
    pub existing_asset: AssetSnapshot,
    pub new_asset: AssetDraft,
}

/// Result of classifying a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictReport {
    pub conflict_free: Vec<AssetDraft>,
    pub conflicts: Vec<AssetConflict>,
}

impl ConflictReport {
    pub fn into_parts(self) -> (Vec<AssetDraft>, Vec<AssetConflict>) {
        (self.conflict_free, self.conflicts)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Classifies batches of records against existing assets.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    batcher: KeyBatcher,
    policy: FieldPolicy,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(FieldPolicy::standard(), DEFAULT_MAX_PREDICATE_SIZE)
    }
}

impl ConflictDetector {
    pub fn new(policy: FieldPolicy, max_predicate_size: usize) -> Self {
        Self {
            batcher: KeyBatcher::new(max_predicate_size),
            policy,
        }
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// Fetches every live asset in `scope` that shares a key of the requested
    /// kinds with any draft, in chunks no larger than the smaller of the
    /// configured and the store's predicate limit.
    pub async fn prefetch<S>(
        &self,
        store: &mut S,
        drafts: &[AssetDraft],
        scope: &TenantScope,
        kinds: &[IdentifierKind],
    ) -> DedupResult<PrefetchIndex>
    where
        S: AssetRecordStore + ?Sized,
    {
        scope.validate()?;
        let batcher = KeyBatcher::new(
            self.batcher
                .max_predicate_size()
                .min(store.max_predicate_size()),
        );

        let mut fetched = Vec::new();
        for kind in kinds {
            let keys = kind.keys(drafts);
            if keys.is_empty() {
                continue;
            }
            let kind = *kind;
            let assets = batcher
                .fetch_all(store, scope, keys, move |chunk| kind.filter(chunk))
                .await?;
            debug!(?kind, matches = assets.len(), "Prefetched existing assets");
            fetched.extend(assets);
        }

        // Insert in creation order so the earliest holder of a key wins.
        sort_by_creation(&mut fetched);
        let mut index = PrefetchIndex::new();
        for asset in fetched {
            index.insert(asset);
        }
        Ok(index)
    }

    /// Splits `drafts` into conflict-free records and conflicts.
    ///
    /// Checks run in the order name, hostname, IP address. Name comes first
    /// because the store's uniqueness constraint is on name alone.
    #[instrument(skip(self, store, drafts), fields(scope = %scope, records = drafts.len()))]
    pub async fn prepare_conflicts<S>(
        &self,
        store: &mut S,
        drafts: Vec<AssetDraft>,
        scope: &TenantScope,
    ) -> DedupResult<ConflictReport>
    where
        S: AssetRecordStore + ?Sized,
    {
        let index = self
            .prefetch(
                store,
                &drafts,
                scope,
                &[
                    IdentifierKind::Name,
                    IdentifierKind::Hostname,
                    IdentifierKind::IpAddress,
                ],
            )
            .await?;

        let mut report = ConflictReport::default();
        for draft in drafts {
            match self.classify(&index, &draft) {
                Some((conflict_type, conflict_key, existing)) => {
                    report.conflicts.push(AssetConflict {
                        conflict_type,
                        conflict_key,
                        existing_asset_id: existing.id,
                        existing_asset: AssetSnapshot::capture(existing, &self.policy),
                        new_asset: draft,
                    });
                }
                None => report.conflict_free.push(draft),
            }
        }

        info!(
            conflict_free = report.conflict_free.len(),
            conflicts = report.conflicts.len(),
            "Conflict detection complete"
        );
        Ok(report)
    }

    fn classify<'a>(
        &self,
        index: &'a PrefetchIndex,
        draft: &AssetDraft,
    ) -> Option<(ConflictType, String, &'a Asset)> {
        let checks = [
            (ConflictType::Name, draft.name(), index.by_name(draft.name())),
            (
                ConflictType::Hostname,
                draft.hostname(),
                index.by_hostname(draft.hostname()),
            ),
            (
                ConflictType::IpAddress,
                draft.ip_address(),
                index.by_ip(draft.ip_address()),
            ),
        ];
        checks.into_iter().find_map(|(conflict_type, key, existing)| {
            Some((conflict_type, key?.to_string(), existing?))
        })
    }
}
