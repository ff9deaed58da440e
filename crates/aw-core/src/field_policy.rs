//! Field policy for asset merging.
//!
//! Defines which asset fields a merge strategy may touch ([`MERGEABLE_FIELDS`]),
//! which fields no strategy may ever touch ([`NEVER_MERGE_FIELDS`]), and which
//! fields may be exposed in a conflict comparison snapshot ([`SNAPSHOT_FIELDS`]).
//!
//! The tables are compile-time constants over the [`AssetField`] enum. Their
//! disjointness is asserted at compile time and re-checked by
//! [`FieldPolicy::validate`] whenever a policy is installed into a service.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Every persisted attribute of an [`Asset`](crate::models::Asset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AssetField {
    Id,
    ClientAccountId,
    EngagementId,
    Name,
    AssetType,
    Hostname,
    FullyQualifiedDomainName,
    IpAddress,
    MacAddress,
    OperatingSystem,
    OsVersion,
    CpuCores,
    MemoryGb,
    StorageGb,
    IsVirtual,
    Environment,
    BusinessOwner,
    TechnicalOwner,
    Department,
    Location,
    Criticality,
    Description,
    ExternalId,
    CustomAttributes,
    RawData,
    ImportMetadata,
    RawImportRecordId,
    DiscoveryFlowId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

impl AssetField {
    /// All fields in declaration order.
    pub const ALL: [AssetField; 31] = [
        AssetField::Id,
        AssetField::ClientAccountId,
        AssetField::EngagementId,
        AssetField::Name,
        AssetField::AssetType,
        AssetField::Hostname,
        AssetField::FullyQualifiedDomainName,
        AssetField::IpAddress,
        AssetField::MacAddress,
        AssetField::OperatingSystem,
        AssetField::OsVersion,
        AssetField::CpuCores,
        AssetField::MemoryGb,
        AssetField::StorageGb,
        AssetField::IsVirtual,
        AssetField::Environment,
        AssetField::BusinessOwner,
        AssetField::TechnicalOwner,
        AssetField::Department,
        AssetField::Location,
        AssetField::Criticality,
        AssetField::Description,
        AssetField::ExternalId,
        AssetField::CustomAttributes,
        AssetField::RawData,
        AssetField::ImportMetadata,
        AssetField::RawImportRecordId,
        AssetField::DiscoveryFlowId,
        AssetField::CreatedAt,
        AssetField::UpdatedAt,
        AssetField::DeletedAt,
    ];

    /// Returns the column/field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetField::Id => "id",
            AssetField::ClientAccountId => "client_account_id",
            AssetField::EngagementId => "engagement_id",
            AssetField::Name => "name",
            AssetField::AssetType => "asset_type",
            AssetField::Hostname => "hostname",
            AssetField::FullyQualifiedDomainName => "fully_qualified_domain_name",
            AssetField::IpAddress => "ip_address",
            AssetField::MacAddress => "mac_address",
            AssetField::OperatingSystem => "operating_system",
            AssetField::OsVersion => "os_version",
            AssetField::CpuCores => "cpu_cores",
            AssetField::MemoryGb => "memory_gb",
            AssetField::StorageGb => "storage_gb",
            AssetField::IsVirtual => "is_virtual",
            AssetField::Environment => "environment",
            AssetField::BusinessOwner => "business_owner",
            AssetField::TechnicalOwner => "technical_owner",
            AssetField::Department => "department",
            AssetField::Location => "location",
            AssetField::Criticality => "criticality",
            AssetField::Description => "description",
            AssetField::ExternalId => "external_id",
            AssetField::CustomAttributes => "custom_attributes",
            AssetField::RawData => "raw_data",
            AssetField::ImportMetadata => "import_metadata",
            AssetField::RawImportRecordId => "raw_import_record_id",
            AssetField::DiscoveryFlowId => "discovery_flow_id",
            AssetField::CreatedAt => "created_at",
            AssetField::UpdatedAt => "updated_at",
            AssetField::DeletedAt => "deleted_at",
        }
    }

    /// Declared value type of the field.
    pub fn kind(&self) -> FieldKind {
        match self {
            AssetField::Id
            | AssetField::ClientAccountId
            | AssetField::EngagementId
            | AssetField::RawImportRecordId
            | AssetField::DiscoveryFlowId => FieldKind::Identifier,
            AssetField::CreatedAt | AssetField::UpdatedAt | AssetField::DeletedAt => {
                FieldKind::Timestamp
            }
            AssetField::CpuCores => FieldKind::Integer,
            AssetField::MemoryGb | AssetField::StorageGb => FieldKind::Float,
            AssetField::IsVirtual => FieldKind::Boolean,
            AssetField::CustomAttributes => FieldKind::Map,
            AssetField::RawData | AssetField::ImportMetadata => FieldKind::Json,
            _ => FieldKind::Text,
        }
    }

    const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

impl std::fmt::Display for AssetField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetField {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| FieldError::UnknownField(s.to_string()))
    }
}

/// Declared value type of an asset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Shallow string-keyed map (custom attributes).
    Map,
    /// Opaque JSON document.
    Json,
    /// System-assigned UUID.
    Identifier,
    /// System-assigned timestamp.
    Timestamp,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Map => "map",
            FieldKind::Json => "json",
            FieldKind::Identifier => "identifier",
            FieldKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Errors raised when reading or assigning field values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// A value could not be coerced to the field's declared type.
    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: AssetField,
        expected: FieldKind,
        found: String,
    },

    /// The field is system-managed and cannot be assigned.
    #[error("Field '{0}' cannot be assigned")]
    NotAssignable(AssetField),

    /// A field name did not match any asset field.
    #[error("Unknown asset field: {0}")]
    UnknownField(String),
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Map(serde_json::Map<String, serde_json::Value>),
    Json(serde_json::Value),
}

impl FieldValue {
    /// Coerces the value to the declared type of `field`.
    ///
    /// String-encoded numbers and booleans are parsed; anything that cannot be
    /// represented losslessly in the target type is rejected.
    pub fn coerce_for(self, field: AssetField) -> Result<FieldValue, FieldError> {
        let expected = field.kind();
        if matches!(expected, FieldKind::Identifier | FieldKind::Timestamp) {
            return Err(FieldError::NotAssignable(field));
        }
        self.coerce_to(expected)
            .map_err(|found| FieldError::TypeMismatch {
                field,
                expected,
                found,
            })
    }

    /// Coerces the value to `kind`, returning a description of the offending
    /// value on failure.
    pub fn coerce_to(self, kind: FieldKind) -> Result<FieldValue, String> {
        match (kind, self) {
            (FieldKind::Text, FieldValue::Text(s)) => Ok(FieldValue::Text(s)),
            (FieldKind::Text, FieldValue::Integer(i)) => Ok(FieldValue::Text(i.to_string())),
            (FieldKind::Text, FieldValue::Float(f)) => Ok(FieldValue::Text(f.to_string())),
            (FieldKind::Text, FieldValue::Boolean(b)) => Ok(FieldValue::Text(b.to_string())),

            (FieldKind::Integer, FieldValue::Integer(i)) => Ok(FieldValue::Integer(i)),
            (FieldKind::Integer, FieldValue::Float(f)) if is_integral(f) => {
                Ok(FieldValue::Integer(f as i64))
            }
            (FieldKind::Integer, FieldValue::Text(s)) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(FieldValue::Integer(i));
                }
                match trimmed.parse::<f64>() {
                    Ok(f) if is_integral(f) => Ok(FieldValue::Integer(f as i64)),
                    _ => Err(FieldValue::Text(s).describe()),
                }
            }

            (FieldKind::Float, FieldValue::Float(f)) if f.is_finite() => Ok(FieldValue::Float(f)),
            (FieldKind::Float, FieldValue::Integer(i)) => Ok(FieldValue::Float(i as f64)),
            (FieldKind::Float, FieldValue::Text(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
                _ => Err(FieldValue::Text(s).describe()),
            },

            (FieldKind::Boolean, FieldValue::Boolean(b)) => Ok(FieldValue::Boolean(b)),
            (FieldKind::Boolean, FieldValue::Integer(0)) => Ok(FieldValue::Boolean(false)),
            (FieldKind::Boolean, FieldValue::Integer(1)) => Ok(FieldValue::Boolean(true)),
            (FieldKind::Boolean, FieldValue::Text(s)) => match parse_bool(&s) {
                Some(b) => Ok(FieldValue::Boolean(b)),
                None => Err(FieldValue::Text(s).describe()),
            },

            (FieldKind::Map, FieldValue::Map(m)) => Ok(FieldValue::Map(m)),
            (FieldKind::Map, FieldValue::Json(serde_json::Value::Object(m))) => {
                Ok(FieldValue::Map(m))
            }

            (FieldKind::Json, FieldValue::Json(v)) => Ok(FieldValue::Json(v)),
            (FieldKind::Json, FieldValue::Map(m)) => {
                Ok(FieldValue::Json(serde_json::Value::Object(m)))
            }

            (_, other) => Err(other.describe()),
        }
    }

    /// Converts the value into JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
            FieldValue::Map(m) => serde_json::Value::Object(m.clone()),
            FieldValue::Json(v) => v.clone(),
        }
    }

    fn describe(&self) -> String {
        match self {
            FieldValue::Text(s) => format!("text {:?}", s),
            FieldValue::Integer(i) => format!("integer {}", i),
            FieldValue::Float(f) => format!("float {}", f),
            FieldValue::Boolean(b) => format!("boolean {}", b),
            FieldValue::Map(_) => "map".to_string(),
            FieldValue::Json(_) => "json".to_string(),
        }
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// A set of asset fields backed by a bitmask over [`AssetField`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<AssetField>", into = "Vec<AssetField>")]
pub struct FieldSet(u64);

impl FieldSet {
    /// The empty set.
    pub const EMPTY: FieldSet = FieldSet(0);

    /// Builds a set from a slice of fields.
    pub const fn of(fields: &[AssetField]) -> Self {
        let mut bits = 0u64;
        let mut i = 0;
        while i < fields.len() {
            bits |= fields[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn contains(&self, field: AssetField) -> bool {
        self.0 & field.bit() != 0
    }

    pub const fn is_disjoint(&self, other: &FieldSet) -> bool {
        self.0 & other.0 == 0
    }

    pub const fn union(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 | other.0)
    }

    pub const fn intersection(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 & other.0)
    }

    pub const fn difference(&self, other: &FieldSet) -> FieldSet {
        FieldSet(self.0 & !other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, field: AssetField) {
        self.0 |= field.bit();
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates the fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = AssetField> + '_ {
        AssetField::ALL
            .iter()
            .copied()
            .filter(move |field| self.contains(*field))
    }
}

impl std::fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<Vec<AssetField>> for FieldSet {
    fn from(fields: Vec<AssetField>) -> Self {
        fields.into_iter().collect()
    }
}

impl From<FieldSet> for Vec<AssetField> {
    fn from(set: FieldSet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<AssetField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = AssetField>>(iter: I) -> Self {
        let mut set = FieldSet::EMPTY;
        for field in iter {
            set.insert(field);
        }
        set
    }
}

/// Fields a merge strategy may touch by default.
pub const MERGEABLE_FIELDS: FieldSet = FieldSet::of(&[
    AssetField::Hostname,
    AssetField::FullyQualifiedDomainName,
    AssetField::IpAddress,
    AssetField::MacAddress,
    AssetField::OperatingSystem,
    AssetField::OsVersion,
    AssetField::CpuCores,
    AssetField::MemoryGb,
    AssetField::StorageGb,
    AssetField::IsVirtual,
    AssetField::Environment,
    AssetField::BusinessOwner,
    AssetField::TechnicalOwner,
    AssetField::Department,
    AssetField::Location,
    AssetField::Criticality,
    AssetField::Description,
    AssetField::ExternalId,
    AssetField::CustomAttributes,
]);

/// Tenant identifiers, primary key, lineage identifiers, and system timestamps.
/// No merge strategy may touch these regardless of the allowlist in effect.
pub const NEVER_MERGE_FIELDS: FieldSet = FieldSet::of(&[
    AssetField::Id,
    AssetField::ClientAccountId,
    AssetField::EngagementId,
    AssetField::RawImportRecordId,
    AssetField::DiscoveryFlowId,
    AssetField::CreatedAt,
    AssetField::UpdatedAt,
    AssetField::DeletedAt,
]);

/// Fields that may appear in a conflict comparison snapshot.
pub const SNAPSHOT_FIELDS: FieldSet = FieldSet::of(&[
    AssetField::Id,
    AssetField::Name,
    AssetField::AssetType,
    AssetField::Hostname,
    AssetField::FullyQualifiedDomainName,
    AssetField::IpAddress,
    AssetField::OperatingSystem,
    AssetField::OsVersion,
    AssetField::Environment,
    AssetField::Criticality,
    AssetField::Location,
    AssetField::UpdatedAt,
]);

/// Fields that must never leave the store through a snapshot.
pub const SENSITIVE_FIELDS: FieldSet = FieldSet::of(&[
    AssetField::CustomAttributes,
    AssetField::RawData,
    AssetField::ImportMetadata,
]);

const _: () = assert!(MERGEABLE_FIELDS.is_disjoint(&NEVER_MERGE_FIELDS));
const _: () = assert!(SNAPSHOT_FIELDS.is_disjoint(&SENSITIVE_FIELDS));

/// Errors raised when a field policy or allowlist is inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldPolicyError {
    #[error("Mergeable fields overlap the never-merge set: {0:?}")]
    MergeableOverlapsProtected(FieldSet),

    #[error("Snapshot fields expose sensitive fields: {0:?}")]
    SnapshotExposesSensitive(FieldSet),

    #[error("Allowlist names protected fields: {0:?}")]
    AllowlistNamesProtected(FieldSet),
}

/// The field tables in effect for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    mergeable: FieldSet,
    protected: FieldSet,
    snapshot: FieldSet,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl FieldPolicy {
    /// The built-in policy.
    pub const fn standard() -> Self {
        Self {
            mergeable: MERGEABLE_FIELDS,
            protected: NEVER_MERGE_FIELDS,
            snapshot: SNAPSHOT_FIELDS,
        }
    }

    /// Builds a policy with a different default allowlist. The never-merge and
    /// snapshot tables are fixed.
    pub fn with_mergeable(mergeable: FieldSet) -> Result<Self, FieldPolicyError> {
        let policy = Self {
            mergeable,
            ..Self::standard()
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Checks the tables are consistent.
    pub fn validate(&self) -> Result<(), FieldPolicyError> {
        let overlap = self.mergeable.intersection(&self.protected);
        if !overlap.is_empty() {
            return Err(FieldPolicyError::MergeableOverlapsProtected(overlap));
        }
        let exposed = self.snapshot.intersection(&SENSITIVE_FIELDS);
        if !exposed.is_empty() {
            return Err(FieldPolicyError::SnapshotExposesSensitive(exposed));
        }
        Ok(())
    }

    /// Rejects a caller-supplied allowlist that names protected fields.
    pub fn check_allowlist(&self, allowlist: &FieldSet) -> Result<(), FieldPolicyError> {
        let named = allowlist.intersection(&self.protected);
        if named.is_empty() {
            Ok(())
        } else {
            Err(FieldPolicyError::AllowlistNamesProtected(named))
        }
    }

    pub fn mergeable(&self) -> FieldSet {
        self.mergeable
    }

    pub fn protected(&self) -> FieldSet {
        self.protected
    }

    pub fn snapshot(&self) -> FieldSet {
        self.snapshot
    }

    pub fn is_protected(&self, field: AssetField) -> bool {
        self.protected.contains(field)
    }

    /// The fields a merge may touch: the custom allowlist (or the default
    /// mergeable set) minus the never-merge set.
    pub fn effective_allowlist(&self, custom: Option<&FieldSet>) -> FieldSet {
        custom
            .copied()
            .unwrap_or(self.mergeable)
            .difference(&self.protected)
    }
}
