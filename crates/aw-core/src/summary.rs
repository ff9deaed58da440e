//! Ingestion run summaries.

use crate::models::Asset;
use crate::service::AssetStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counts of each outcome in an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Number of assets created.
    pub created: u64,
    /// Number of records matched and left unchanged.
    pub existed: u64,
    /// Number of assets merged.
    pub updated: u64,
    /// Number of records reported as conflicts.
    pub conflicts: u64,
    /// Total duration of the run in milliseconds.
    pub duration_ms: u64,
    /// Timestamp when the run completed.
    pub completed_at: DateTime<Utc>,
}

impl Default for IngestSummary {
    fn default() -> Self {
        Self {
            created: 0,
            existed: 0,
            updated: 0,
            conflicts: 0,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }
}

impl IngestSummary {
    /// Tallies the statuses of a finished run.
    pub fn from_results<'a, I>(results: I, elapsed: Duration) -> Self
    where
        I: IntoIterator<Item = &'a (Asset, AssetStatus)>,
    {
        let mut summary = Self::default();
        for (_, status) in results {
            summary.record(*status);
        }
        summary.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        summary
    }

    pub fn record(&mut self, status: AssetStatus) {
        match status {
            AssetStatus::Created => self.created += 1,
            AssetStatus::Existed => self.existed += 1,
            AssetStatus::Updated => self.updated += 1,
            AssetStatus::Conflict => self.conflicts += 1,
        }
    }

    /// Total number of records processed.
    pub fn total(&self) -> u64 {
        self.created + self.existed + self.updated + self.conflicts
    }

    /// Returns the number of writes the run made.
    pub fn total_changes(&self) -> u64 {
        self.created + self.updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetType;
    use crate::scope::TenantScope;
    use uuid::Uuid;

    #[test]
    fn test_summary_from_results() {
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let asset = Asset::new(&scope, "srv1".to_string(), AssetType::Server);
        let results = vec![
            (asset.clone(), AssetStatus::Created),
            (asset.clone(), AssetStatus::Created),
            (asset.clone(), AssetStatus::Existed),
            (asset.clone(), AssetStatus::Updated),
            (asset, AssetStatus::Conflict),
        ];

        let summary = IngestSummary::from_results(&results, Duration::from_millis(42));
        assert_eq!(summary.created, 2);
        assert_eq!(summary.existed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.total_changes(), 3);
        assert_eq!(summary.duration_ms, 42);
    }
}
