//! Batch ingestion.
//!
//! [`AssetService::bulk_create_or_update`] prefetches every existing asset the
//! batch could match, one chunked query set per identifier kind, then resolves
//! each record against the in-memory index with the same precedence as the
//! per-record resolver. New and merged assets are written back into the index
//! so later records in the batch see them. All writes are staged and flushed
//! once at the end.

use crate::conflicts::{IdentifierKind, PrefetchIndex};
use crate::error::DedupResult;
use crate::models::{Asset, AssetDraft};
use crate::resolver::MatchCriterion;
use crate::scope::TenantScope;
use crate::service::{AssetService, AssetStatus, UpsertOptions};
use crate::store::AssetRecordStore;
use tracing::{debug, info, instrument, warn};

const PREFETCH_KINDS: [IdentifierKind; 6] = [
    IdentifierKind::Name,
    IdentifierKind::Hostname,
    IdentifierKind::Fqdn,
    IdentifierKind::IpAddress,
    IdentifierKind::NormalizedName,
    IdentifierKind::ExternalId,
];

/// Resolves a record against the index.
///
/// Precedence: name and type, then the earliest asset sharing a hostname,
/// FQDN or IP address, then the normalized-name substring, then the import
/// identifier. Name alone comes last: an exact name hit that nothing else
/// matched would otherwise fail the final flush on the uniqueness constraint.
fn resolve_in_index<'a>(
    index: &'a PrefetchIndex,
    draft: &AssetDraft,
) -> Option<(&'a Asset, MatchCriterion)> {
    if let Some(asset) = index.by_name_and_type(draft.name(), &draft.asset_type_or_default()) {
        return Some((asset, MatchCriterion::NameAndType));
    }

    let identifier_match = [
        (index.by_hostname(draft.hostname()), MatchCriterion::Hostname),
        (index.by_fqdn(draft.fqdn()), MatchCriterion::Fqdn),
        (index.by_ip(draft.ip_address()), MatchCriterion::IpAddress),
    ]
    .into_iter()
    .filter_map(|(asset, criterion)| asset.map(|a| (a, criterion)))
    .min_by_key(|(asset, _)| index.position(&asset.id));
    if identifier_match.is_some() {
        return identifier_match;
    }

    if let Some(asset) = index.by_name_substring(draft.normalized_name().as_deref()) {
        return Some((asset, MatchCriterion::NormalizedName));
    }
    if let Some(asset) = index.by_external_id(draft.import_identifier().as_deref()) {
        return Some((asset, MatchCriterion::ExternalId));
    }
    index
        .by_name(draft.name())
        .map(|asset| (asset, MatchCriterion::Name))
}

impl<S: AssetRecordStore> AssetService<S> {
    /// Ingests a batch of records with one prefetch query set and one flush.
    ///
    /// Returns one `(asset, status)` per record, in input order. Statuses
    /// follow [`create_or_update`](Self::create_or_update). A merge or flush
    /// failure rolls back every staged write of the batch and is returned;
    /// retrying the batch or falling back to per-record ingestion is up to
    /// the caller.
    #[instrument(skip(self, drafts, options), fields(scope = %scope, records = drafts.len()))]
    pub async fn bulk_create_or_update(
        &mut self,
        drafts: &[AssetDraft],
        scope: &TenantScope,
        options: &UpsertOptions,
    ) -> DedupResult<Vec<(Asset, AssetStatus)>> {
        scope.validate()?;
        self.warn_on_protected_allowlist(options);

        let mut index = self
            .detector
            .prefetch(&mut self.store, drafts, scope, &PREFETCH_KINDS)
            .await?;
        debug!(prefetched = index.len(), "Built prefetch index");

        let results = match self.stage_batch(&mut index, drafts, scope, options) {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "Batch staging failed, rolling back staged writes");
                self.store.rollback_to_usable().await?;
                return Err(err);
            }
        };

        if let Err(err) = self.store.flush().await {
            warn!(error = %err, "Batch flush failed, rolling back staged writes");
            self.store.rollback_to_usable().await?;
            return Err(err.into());
        }

        info!(
            created = count(&results, AssetStatus::Created),
            existed = count(&results, AssetStatus::Existed),
            updated = count(&results, AssetStatus::Updated),
            conflicts = count(&results, AssetStatus::Conflict),
            "Batch ingested"
        );
        Ok(results)
    }

    /// Resolves every draft against `index` and stages the resulting writes.
    /// Nothing is flushed; on error the caller discards what was staged.
    fn stage_batch(
        &mut self,
        index: &mut PrefetchIndex,
        drafts: &[AssetDraft],
        scope: &TenantScope,
        options: &UpsertOptions,
    ) -> DedupResult<Vec<(Asset, AssetStatus)>> {
        let mut results = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let resolved = resolve_in_index(index, draft)
                .map(|(asset, criterion)| (asset.clone(), criterion));

            let outcome = match resolved {
                Some((existing, criterion)) => {
                    debug!(asset_id = %existing.id, %criterion, "Resolved from index");
                    if options.conflict_detection_only {
                        (existing, AssetStatus::Conflict)
                    } else if !options.allow_upsert {
                        (existing, AssetStatus::Existed)
                    } else {
                        let mut merged = existing;
                        self.merger.merge(
                            options.merge_strategy,
                            &mut merged,
                            draft,
                            options.field_allowlist.as_ref(),
                        )?;
                        self.store.stage_update(merged.clone());
                        index.replace(merged.clone());
                        (merged, AssetStatus::Updated)
                    }
                }
                None => {
                    let asset = Asset::from_draft(scope, draft);
                    self.store.stage_insert(asset.clone());
                    index.insert(asset.clone());
                    (asset, AssetStatus::Created)
                }
            };
            results.push(outcome);
        }
        Ok(results)
    }
}

fn count(results: &[(Asset, AssetStatus)], status: AssetStatus) -> usize {
    results.iter().filter(|(_, s)| *s == status).count()
}
