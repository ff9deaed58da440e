//! Ingestion configuration.

use crate::error::{DedupError, DedupResult};
use crate::field_policy::{AssetField, FieldPolicy, FieldSet};
use crate::merge::MergeStrategy;
use crate::service::UpsertOptions;
use crate::store::DEFAULT_MAX_PREDICATE_SIZE;
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`DedupConfig::max_predicate_size`].
pub const ENV_MAX_PREDICATE_SIZE: &str = "ASSET_WARDEN_MAX_PREDICATE_SIZE";
/// Environment variable overriding [`DedupConfig::allow_upsert`].
pub const ENV_ALLOW_UPSERT: &str = "ASSET_WARDEN_ALLOW_UPSERT";
/// Environment variable overriding [`DedupConfig::merge_strategy`].
pub const ENV_MERGE_STRATEGY: &str = "ASSET_WARDEN_MERGE_STRATEGY";

/// Deduplication and merge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum number of keys per IN-list query during prefetch.
    #[serde(default = "default_max_predicate_size")]
    pub max_predicate_size: usize,

    /// Merge into matched assets instead of returning them unchanged.
    #[serde(default)]
    pub allow_upsert: bool,

    /// Strategy used when upserting.
    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Fields a merge may touch; the policy's mergeable set when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_allowlist: Option<Vec<AssetField>>,
}

fn default_max_predicate_size() -> usize {
    DEFAULT_MAX_PREDICATE_SIZE
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_predicate_size: default_max_predicate_size(),
            allow_upsert: false,
            merge_strategy: MergeStrategy::default(),
            field_allowlist: None,
        }
    }
}

impl DedupConfig {
    /// Defaults overlaid with `ASSET_WARDEN_*` environment variables.
    pub fn from_env() -> DedupResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays values found through `lookup` (keyed by environment variable name).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> DedupResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_PREDICATE_SIZE) {
            self.max_predicate_size = raw.trim().parse().map_err(|_| {
                DedupError::Configuration(format!(
                    "{} must be a positive integer, got {:?}",
                    ENV_MAX_PREDICATE_SIZE, raw
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_ALLOW_UPSERT) {
            self.allow_upsert = crate::field_policy::parse_bool(&raw).ok_or_else(|| {
                DedupError::Configuration(format!(
                    "{} must be a boolean, got {:?}",
                    ENV_ALLOW_UPSERT, raw
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_MERGE_STRATEGY) {
            self.merge_strategy = raw.parse().map_err(DedupError::Configuration)?;
        }
        Ok(())
    }

    /// Checks the settings against `policy`.
    pub fn validate(&self, policy: &FieldPolicy) -> DedupResult<()> {
        if self.max_predicate_size == 0 {
            return Err(DedupError::Configuration(
                "max_predicate_size must be greater than zero".to_string(),
            ));
        }
        if let Some(allowlist) = self.allowlist() {
            policy.check_allowlist(&allowlist)?;
        }
        Ok(())
    }

    /// The configured allowlist as a field set.
    pub fn allowlist(&self) -> Option<FieldSet> {
        self.field_allowlist
            .as_ref()
            .map(|fields| fields.iter().copied().collect())
    }

    /// Per-call options derived from this configuration.
    pub fn upsert_options(&self) -> UpsertOptions {
        UpsertOptions {
            allow_upsert: self.allow_upsert,
            merge_strategy: self.merge_strategy,
            conflict_detection_only: false,
            field_allowlist: self.allowlist(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DedupConfig::default();
        assert_eq!(config.max_predicate_size, 500);
        assert!(!config.allow_upsert);
        assert_eq!(config.merge_strategy, MergeStrategy::Enrich);
        assert!(config.validate(&FieldPolicy::standard()).is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = DedupConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_MAX_PREDICATE_SIZE, "100"),
                (ENV_ALLOW_UPSERT, "yes"),
                (ENV_MERGE_STRATEGY, "overwrite"),
            ]))
            .unwrap();

        assert_eq!(config.max_predicate_size, 100);
        assert!(config.allow_upsert);
        assert_eq!(config.merge_strategy, MergeStrategy::Overwrite);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(ENV_MAX_PREDICATE_SIZE, "64");
        std::env::set_var(ENV_MERGE_STRATEGY, "overwrite");
        let config = DedupConfig::from_env();
        std::env::remove_var(ENV_MAX_PREDICATE_SIZE);
        std::env::remove_var(ENV_MERGE_STRATEGY);

        let config = config.unwrap();
        assert_eq!(config.max_predicate_size, 64);
        assert_eq!(config.merge_strategy, MergeStrategy::Overwrite);
        assert!(!config.allow_upsert);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = DedupConfig::default();
        assert!(config
            .apply_overrides(lookup(&[(ENV_MAX_PREDICATE_SIZE, "lots")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[(ENV_MERGE_STRATEGY, "replace")]))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_zero_and_protected_allowlist() {
        let policy = FieldPolicy::standard();
        let config = DedupConfig {
            max_predicate_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(&policy),
            Err(DedupError::Configuration(_))
        ));

        let config = DedupConfig {
            field_allowlist: Some(vec![AssetField::Location, AssetField::EngagementId]),
            ..Default::default()
        };
        assert!(matches!(config.validate(&policy), Err(DedupError::Policy(_))));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "max_predicate_size: 250\nallow_upsert: true\nmerge_strategy: overwrite\nfield_allowlist: [location, criticality]\n";
        let config: DedupConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_predicate_size, 250);
        let options = config.upsert_options();
        assert!(options.allow_upsert);
        assert_eq!(options.merge_strategy, MergeStrategy::Overwrite);
        assert_eq!(options.field_allowlist.map(|s| s.len()), Some(2));
    }
}
