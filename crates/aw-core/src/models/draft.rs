//! Incoming asset records.
//!
//! An [`AssetDraft`] is what an import pipeline submits: every field is
//! optional, unknown fields are rejected at deserialisation time, and loosely
//! typed scalars (`"8"`, `"true"`, `4.0`) are coerced to their declared type
//! here rather than inside merge logic.

use crate::field_policy::{AssetField, FieldKind, FieldValue};
use crate::models::asset::{metadata_external_id, non_blank};
use crate::models::{AssetType, Criticality, Environment};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A strongly-typed incoming record with explicit optional fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetDraft {
    pub name: Option<String>,
    pub asset_type: Option<AssetType>,
    pub hostname: Option<String>,
    pub fully_qualified_domain_name: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub operating_system: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub os_version: Option<String>,
    #[serde(deserialize_with = "loose_integer")]
    pub cpu_cores: Option<i64>,
    #[serde(deserialize_with = "loose_float")]
    pub memory_gb: Option<f64>,
    #[serde(deserialize_with = "loose_float")]
    pub storage_gb: Option<f64>,
    #[serde(deserialize_with = "loose_bool")]
    pub is_virtual: Option<bool>,
    pub environment: Option<Environment>,
    pub business_owner: Option<String>,
    pub technical_owner: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub criticality: Option<Criticality>,
    pub description: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub external_id: Option<String>,
    pub custom_attributes: Option<serde_json::Map<String, serde_json::Value>>,
    pub raw_data: Option<serde_json::Value>,
    pub import_metadata: Option<serde_json::Value>,
    pub raw_import_record_id: Option<Uuid>,
    pub discovery_flow_id: Option<Uuid>,
}

impl AssetDraft {
    /// Creates a draft with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = Some(asset_type);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Returns the value the draft supplies for `field`, or `None` when the
    /// draft leaves it absent. Fields a draft cannot carry always return `None`.
    pub fn field_value(&self, field: AssetField) -> Option<FieldValue> {
        fn text(value: &Option<String>) -> Option<FieldValue> {
            value.clone().map(FieldValue::Text)
        }
        fn identifier(value: Option<&str>) -> Option<FieldValue> {
            value.map(|v| FieldValue::Text(v.to_string()))
        }

        match field {
            AssetField::Name => text(&self.name),
            AssetField::AssetType => self
                .asset_type
                .as_ref()
                .map(|t| FieldValue::Text(t.as_db_str().to_string())),
            AssetField::Hostname => identifier(self.hostname()),
            AssetField::FullyQualifiedDomainName => identifier(self.fqdn()),
            AssetField::IpAddress => identifier(self.ip_address()),
            AssetField::MacAddress => text(&self.mac_address),
            AssetField::OperatingSystem => text(&self.operating_system),
            AssetField::OsVersion => text(&self.os_version),
            AssetField::CpuCores => self.cpu_cores.map(FieldValue::Integer),
            AssetField::MemoryGb => self.memory_gb.map(FieldValue::Float),
            AssetField::StorageGb => self.storage_gb.map(FieldValue::Float),
            AssetField::IsVirtual => self.is_virtual.map(FieldValue::Boolean),
            AssetField::Environment => self
                .environment
                .as_ref()
                .map(|e| FieldValue::Text(e.as_db_str().to_string())),
            AssetField::BusinessOwner => text(&self.business_owner),
            AssetField::TechnicalOwner => text(&self.technical_owner),
            AssetField::Department => text(&self.department),
            AssetField::Location => text(&self.location),
            AssetField::Criticality => self
                .criticality
                .map(|c| FieldValue::Text(c.as_db_str().to_string())),
            AssetField::Description => text(&self.description),
            AssetField::ExternalId => text(&self.external_id),
            AssetField::CustomAttributes => self.custom_attributes.clone().map(FieldValue::Map),
            AssetField::RawData => self.raw_data.clone().map(FieldValue::Json),
            AssetField::ImportMetadata => self.import_metadata.clone().map(FieldValue::Json),
            AssetField::Id
            | AssetField::ClientAccountId
            | AssetField::EngagementId
            | AssetField::RawImportRecordId
            | AssetField::DiscoveryFlowId
            | AssetField::CreatedAt
            | AssetField::UpdatedAt
            | AssetField::DeletedAt => None,
        }
    }

    /// The trimmed name, if present and not blank.
    pub fn name(&self) -> Option<&str> {
        non_blank(&self.name)
    }

    pub fn hostname(&self) -> Option<&str> {
        non_blank(&self.hostname)
    }

    pub fn fqdn(&self) -> Option<&str> {
        non_blank(&self.fully_qualified_domain_name)
    }

    pub fn ip_address(&self) -> Option<&str> {
        non_blank(&self.ip_address)
    }

    /// The asset type used for matching and creation; `Other` when absent.
    pub fn asset_type_or_default(&self) -> AssetType {
        self.asset_type.clone().unwrap_or_default()
    }

    /// The import identifier: the `external_id` field, falling back to
    /// `import_metadata.external_id`.
    pub fn import_identifier(&self) -> Option<String> {
        non_blank(&self.external_id)
            .map(str::to_string)
            .or_else(|| metadata_external_id(self.import_metadata.as_ref()))
    }

    /// Lower-cased name with whitespace runs collapsed to single hyphens.
    ///
    /// Returns `None` for a missing or blank name.
    pub fn normalized_name(&self) -> Option<String> {
        let name = self.name()?;
        let normalized = name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-");
        Some(normalized)
    }
}

/// Scalar shapes accepted for loosely typed fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Loose> for FieldValue {
    fn from(loose: Loose) -> Self {
        match loose {
            Loose::Bool(b) => FieldValue::Boolean(b),
            Loose::Int(i) => FieldValue::Integer(i),
            Loose::Float(f) => FieldValue::Float(f),
            Loose::Text(s) => FieldValue::Text(s),
        }
    }
}

fn loose<'de, D>(deserializer: D, kind: FieldKind) -> Result<Option<FieldValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Loose> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(Loose::Text(s)) if s.trim().is_empty() && kind != FieldKind::Text => Ok(None),
        Some(value) => FieldValue::from(value)
            .coerce_to(kind)
            .map(Some)
            .map_err(|found| serde::de::Error::custom(format!("expected {}, got {}", kind, found))),
    }
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match loose(deserializer, FieldKind::Text)? {
        Some(FieldValue::Text(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn loose_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match loose(deserializer, FieldKind::Integer)? {
        Some(FieldValue::Integer(i)) => Ok(Some(i)),
        _ => Ok(None),
    }
}

fn loose_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match loose(deserializer, FieldKind::Float)? {
        Some(FieldValue::Float(f)) => Ok(Some(f)),
        _ => Ok(None),
    }
}

fn loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match loose(deserializer, FieldKind::Boolean)? {
        Some(FieldValue::Boolean(b)) => Ok(Some(b)),
        _ => Ok(None),
    }
}
