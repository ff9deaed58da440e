//! Field merging onto existing assets.
//!
//! Two strategies:
//!
//! - **enrich** fills fields that are currently absent (`None`). A present
//!   value is never replaced, even `0`, `false` or an empty string. Custom
//!   attributes are merged as a shallow union where incoming keys win.
//! - **overwrite** replaces every allowed field the incoming record supplies.
//!
//! Both operate on the allowlist minus the policy's never-merge set, coerce
//! values to the field's declared type, mutate the asset in place and touch
//! `updated_at`. Persisting the change is the caller's job.

use crate::field_policy::{AssetField, FieldError, FieldPolicy, FieldSet, FieldValue};
use crate::models::{Asset, AssetDraft};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// How incoming values are applied to an existing asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Fill absent fields only.
    #[default]
    Enrich,
    /// Replace allowed fields unconditionally.
    Overwrite,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Enrich => "enrich",
            MergeStrategy::Overwrite => "overwrite",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enrich" => Ok(MergeStrategy::Enrich),
            "overwrite" => Ok(MergeStrategy::Overwrite),
            _ => Err(format!("Invalid merge strategy: {}", s)),
        }
    }
}

/// Fields a merge actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed: Vec<AssetField>,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Applies merge strategies under a [`FieldPolicy`].
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    policy: FieldPolicy,
}

impl MergeEngine {
    pub fn new(policy: FieldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// Applies `strategy`. `allowlist` of `None` means the policy's mergeable set.
    pub fn merge(
        &self,
        strategy: MergeStrategy,
        existing: &mut Asset,
        draft: &AssetDraft,
        allowlist: Option<&FieldSet>,
    ) -> Result<MergeOutcome, FieldError> {
        match strategy {
            MergeStrategy::Enrich => self.enrich(existing, draft, allowlist),
            MergeStrategy::Overwrite => self.overwrite(existing, draft, allowlist),
        }
    }

    /// Fills allowed fields that are absent on `existing`.
    ///
    /// On error `existing` is left untouched.
    pub fn enrich(
        &self,
        existing: &mut Asset,
        draft: &AssetDraft,
        allowlist: Option<&FieldSet>,
    ) -> Result<MergeOutcome, FieldError> {
        self.apply(existing, draft, allowlist, |working, field, incoming| {
            if field == AssetField::CustomAttributes {
                return union_attributes(working, incoming);
            }
            if working.field_value(field).is_some() {
                return Ok(false);
            }
            working.set_field(field, incoming)?;
            Ok(true)
        })
    }

    /// Replaces allowed fields the draft supplies.
    ///
    /// On error `existing` is left untouched.
    pub fn overwrite(
        &self,
        existing: &mut Asset,
        draft: &AssetDraft,
        allowlist: Option<&FieldSet>,
    ) -> Result<MergeOutcome, FieldError> {
        self.apply(existing, draft, allowlist, |working, field, incoming| {
            let before = working.field_value(field);
            working.set_field(field, incoming)?;
            Ok(working.field_value(field) != before)
        })
    }

    fn apply<F>(
        &self,
        existing: &mut Asset,
        draft: &AssetDraft,
        allowlist: Option<&FieldSet>,
        mut assign: F,
    ) -> Result<MergeOutcome, FieldError>
    where
        F: FnMut(&mut Asset, AssetField, FieldValue) -> Result<bool, FieldError>,
    {
        let allowed = self.policy.effective_allowlist(allowlist);
        let mut working = existing.clone();
        let mut outcome = MergeOutcome::default();

        for field in allowed.iter() {
            debug_assert!(!self.policy.is_protected(field));
            let Some(incoming) = draft.field_value(field) else {
                continue;
            };
            if assign(&mut working, field, incoming)? {
                outcome.changed.push(field);
            }
        }

        working.touch();
        debug!(asset_id = %working.id, changed = ?outcome.changed, "Merged fields");
        *existing = working;
        Ok(outcome)
    }
}

fn union_attributes(working: &mut Asset, incoming: FieldValue) -> Result<bool, FieldError> {
    let FieldValue::Map(incoming) = incoming.coerce_for(AssetField::CustomAttributes)? else {
        return Ok(false);
    };
    let mut changed = false;
    for (key, value) in incoming {
        if working.custom_attributes.get(&key) != Some(&value) {
            working.custom_attributes.insert(key, value);
            changed = true;
        }
    }
    Ok(changed)
}
