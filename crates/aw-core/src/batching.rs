//! Chunked IN-list lookups.
//!
//! Stores cap the number of values one predicate may carry. [`KeyBatcher`]
//! deduplicates a key list, splits it into chunks no larger than that cap and
//! merges the per-chunk results so callers see the same rows, in the same
//! order, as a single unbounded query would return.

use crate::models::Asset;
use crate::scope::TenantScope;
use crate::store::{sort_by_creation, AssetFilter, AssetRecordStore, StoreResult};
use std::collections::HashSet;
use std::hash::Hash;
use tracing::trace;

/// Splits key lists by a maximum predicate size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBatcher {
    max_predicate_size: usize,
}

impl KeyBatcher {
    /// Creates a batcher; a zero size is treated as one.
    pub fn new(max_predicate_size: usize) -> Self {
        Self {
            max_predicate_size: max_predicate_size.max(1),
        }
    }

    /// A batcher sized for the given store.
    pub fn for_store<S: AssetRecordStore + ?Sized>(store: &S) -> Self {
        Self::new(store.max_predicate_size())
    }

    pub fn max_predicate_size(&self) -> usize {
        self.max_predicate_size
    }

    /// Deduplicates `keys` (keeping first occurrences) and splits them into
    /// chunks of at most `max_predicate_size` keys.
    pub fn chunks<I, K>(&self, keys: I) -> Vec<Vec<K>>
    where
        I: IntoIterator<Item = K>,
        K: Eq + Hash + Clone,
    {
        let mut seen = HashSet::new();
        let unique: Vec<K> = keys
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect();
        unique
            .chunks(self.max_predicate_size)
            .map(<[K]>::to_vec)
            .collect()
    }

    /// Issues one scoped read per chunk of `keys` and returns the union of
    /// matches, deduplicated by id and ordered by `(created_at, id)`.
    pub async fn fetch_all<S, F>(
        &self,
        store: &mut S,
        scope: &TenantScope,
        keys: Vec<String>,
        make_filter: F,
    ) -> StoreResult<Vec<Asset>>
    where
        S: AssetRecordStore + ?Sized,
        F: Fn(Vec<String>) -> AssetFilter + Send,
    {
        let mut seen = HashSet::new();
        let mut assets = Vec::new();
        for chunk in self.chunks(keys) {
            trace!(chunk_len = chunk.len(), "Fetching key chunk");
            let filter = make_filter(chunk);
            for asset in store.find(scope, &filter).await? {
                if seen.insert(asset.id) {
                    assets.push(asset);
                }
            }
        }
        sort_by_creation(&mut assets);
        Ok(assets)
    }
}
