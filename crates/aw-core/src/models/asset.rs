//! Asset data model.
//!
//! An asset is one piece of discovered infrastructure (server, application,
//! network device, ...) owned by a tenant scope. Identity attributes (`name`,
//! `hostname`, `fully_qualified_domain_name`, `ip_address`, `asset_type`) drive
//! identity resolution; descriptive attributes are eligible for merging
//! according to the [`FieldPolicy`](crate::field_policy::FieldPolicy).

use crate::field_policy::{AssetField, FieldError, FieldValue};
use crate::models::AssetDraft;
use crate::scope::TenantScope;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Current time at the microsecond precision the stores persist.
pub(crate) fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Represents an infrastructure asset in the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Unique identifier for this asset.
    pub id: Uuid,
    /// Client account owning this asset.
    pub client_account_id: Uuid,
    /// Engagement owning this asset.
    pub engagement_id: Uuid,
    /// Human-readable name, unique within the tenant scope.
    pub name: String,
    /// Type of asset.
    pub asset_type: AssetType,
    pub hostname: Option<String>,
    pub fully_qualified_domain_name: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub operating_system: Option<String>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub storage_gb: Option<f64>,
    pub is_virtual: Option<bool>,
    pub environment: Option<Environment>,
    pub business_owner: Option<String>,
    pub technical_owner: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub criticality: Option<Criticality>,
    pub description: Option<String>,
    /// Identifier assigned by the source system of an import.
    pub external_id: Option<String>,
    /// Free-form attributes. An empty map means no custom attributes.
    #[serde(default)]
    pub custom_attributes: serde_json::Map<String, serde_json::Value>,
    /// Raw source payload the asset was created from.
    pub raw_data: Option<serde_json::Value>,
    /// Structured import metadata (may carry an `external_id`).
    pub import_metadata: Option<serde_json::Value>,
    /// Lineage: raw import record this asset originated from.
    pub raw_import_record_id: Option<Uuid>,
    /// Lineage: discovery flow that created this asset.
    pub discovery_flow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Asset {
    /// Creates a new asset with required fields.
    pub fn new(scope: &TenantScope, name: String, asset_type: AssetType) -> Self {
        let now = timestamp_now();
        Self {
            id: Uuid::new_v4(),
            client_account_id: scope.client_account_id,
            engagement_id: scope.engagement_id,
            name,
            asset_type,
            hostname: None,
            fully_qualified_domain_name: None,
            ip_address: None,
            mac_address: None,
            operating_system: None,
            os_version: None,
            cpu_cores: None,
            memory_gb: None,
            storage_gb: None,
            is_virtual: None,
            environment: None,
            business_owner: None,
            technical_owner: None,
            department: None,
            location: None,
            criticality: None,
            description: None,
            external_id: None,
            custom_attributes: serde_json::Map::new(),
            raw_data: None,
            import_metadata: None,
            raw_import_record_id: None,
            discovery_flow_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Builds a new, not yet persisted asset from an incoming draft.
    ///
    /// Tenant identifiers always come from `scope`; the draft has no way to
    /// carry them. A draft without a name produces an asset with an empty name,
    /// which the store rejects as an integrity violation.
    pub fn from_draft(scope: &TenantScope, draft: &AssetDraft) -> Self {
        let name = draft.name().unwrap_or_default().to_string();
        let mut asset = Asset::new(scope, name, draft.asset_type_or_default());

        asset.hostname = draft.hostname().map(str::to_string);
        asset.fully_qualified_domain_name = draft.fqdn().map(str::to_string);
        asset.ip_address = draft.ip_address().map(str::to_string);
        asset.mac_address = draft.mac_address.clone();
        asset.operating_system = draft.operating_system.clone();
        asset.os_version = draft.os_version.clone();
        asset.cpu_cores = draft.cpu_cores;
        asset.memory_gb = draft.memory_gb;
        asset.storage_gb = draft.storage_gb;
        asset.is_virtual = draft.is_virtual;
        asset.environment = draft.environment.clone();
        asset.business_owner = draft.business_owner.clone();
        asset.technical_owner = draft.technical_owner.clone();
        asset.department = draft.department.clone();
        asset.location = draft.location.clone();
        asset.criticality = draft.criticality;
        asset.description = draft.description.clone();
        asset.external_id = draft.external_id.clone();
        asset.custom_attributes = draft.custom_attributes.clone().unwrap_or_default();
        asset.raw_data = draft.raw_data.clone();
        asset.import_metadata = draft.import_metadata.clone();
        asset.raw_import_record_id = draft.raw_import_record_id;
        asset.discovery_flow_id = draft.discovery_flow_id;
        asset
    }

    /// Returns the current value of a field, or `None` when it is absent.
    ///
    /// Absence is structural: `Some(0)`, `Some(false)` and `Some("")` are all
    /// present values. An empty custom-attribute map counts as absent.
    pub fn field_value(&self, field: AssetField) -> Option<FieldValue> {
        fn text(value: &Option<String>) -> Option<FieldValue> {
            value.clone().map(FieldValue::Text)
        }

        match field {
            AssetField::Id => Some(FieldValue::Text(self.id.to_string())),
            AssetField::ClientAccountId => Some(FieldValue::Text(self.client_account_id.to_string())),
            AssetField::EngagementId => Some(FieldValue::Text(self.engagement_id.to_string())),
            AssetField::Name => Some(FieldValue::Text(self.name.clone())),
            AssetField::AssetType => Some(FieldValue::Text(self.asset_type.as_db_str().to_string())),
            AssetField::Hostname => text(&self.hostname),
            AssetField::FullyQualifiedDomainName => text(&self.fully_qualified_domain_name),
            AssetField::IpAddress => text(&self.ip_address),
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
            AssetField::CustomAttributes => {
                if self.custom_attributes.is_empty() {
                    None
                } else {
                    Some(FieldValue::Map(self.custom_attributes.clone()))
                }
            }
            AssetField::RawData => self.raw_data.clone().map(FieldValue::Json),
            AssetField::ImportMetadata => self.import_metadata.clone().map(FieldValue::Json),
            AssetField::RawImportRecordId => self
                .raw_import_record_id
                .map(|id| FieldValue::Text(id.to_string())),
            AssetField::DiscoveryFlowId => self
                .discovery_flow_id
                .map(|id| FieldValue::Text(id.to_string())),
            AssetField::CreatedAt => Some(FieldValue::Text(self.created_at.to_rfc3339())),
            AssetField::UpdatedAt => Some(FieldValue::Text(self.updated_at.to_rfc3339())),
            AssetField::DeletedAt => self.deleted_at.map(|t| FieldValue::Text(t.to_rfc3339())),
        }
    }

    /// Assigns a field after coercing the value to the field's declared type.
    ///
    /// System-managed fields (identifiers, tenant scope, timestamps) are not
    /// assignable through this method.
    pub fn set_field(&mut self, field: AssetField, value: FieldValue) -> Result<(), FieldError> {
        let value = value.coerce_for(field)?;
        let mismatch = |found: &FieldValue| FieldError::TypeMismatch {
            field,
            expected: field.kind(),
            found: format!("{:?}", found),
        };

        match (field, value) {
            (AssetField::Name, FieldValue::Text(s)) => self.name = s,
            (AssetField::AssetType, FieldValue::Text(s)) => self.asset_type = AssetType::from(s),
            (AssetField::Hostname, FieldValue::Text(s)) => self.hostname = Some(s),
            (AssetField::FullyQualifiedDomainName, FieldValue::Text(s)) => {
                self.fully_qualified_domain_name = Some(s)
            }
            (AssetField::IpAddress, FieldValue::Text(s)) => self.ip_address = Some(s),
            (AssetField::MacAddress, FieldValue::Text(s)) => self.mac_address = Some(s),
            (AssetField::OperatingSystem, FieldValue::Text(s)) => self.operating_system = Some(s),
            (AssetField::OsVersion, FieldValue::Text(s)) => self.os_version = Some(s),
            (AssetField::CpuCores, FieldValue::Integer(i)) => self.cpu_cores = Some(i),
            (AssetField::MemoryGb, FieldValue::Float(f)) => self.memory_gb = Some(f),
            (AssetField::StorageGb, FieldValue::Float(f)) => self.storage_gb = Some(f),
            (AssetField::IsVirtual, FieldValue::Boolean(b)) => self.is_virtual = Some(b),
            (AssetField::Environment, FieldValue::Text(s)) => {
                self.environment = Some(Environment::from(s))
            }
            (AssetField::BusinessOwner, FieldValue::Text(s)) => self.business_owner = Some(s),
            (AssetField::TechnicalOwner, FieldValue::Text(s)) => self.technical_owner = Some(s),
            (AssetField::Department, FieldValue::Text(s)) => self.department = Some(s),
            (AssetField::Location, FieldValue::Text(s)) => self.location = Some(s),
            (AssetField::Criticality, FieldValue::Text(s)) => {
                let criticality = s
                    .parse::<Criticality>()
                    .map_err(|_| mismatch(&FieldValue::Text(s.clone())))?;
                self.criticality = Some(criticality);
            }
            (AssetField::Description, FieldValue::Text(s)) => self.description = Some(s),
            (AssetField::ExternalId, FieldValue::Text(s)) => self.external_id = Some(s),
            (AssetField::CustomAttributes, FieldValue::Map(m)) => self.custom_attributes = m,
            (AssetField::RawData, FieldValue::Json(v)) => self.raw_data = Some(v),
            (AssetField::ImportMetadata, FieldValue::Json(v)) => self.import_metadata = Some(v),
            (
                AssetField::Id
                | AssetField::ClientAccountId
                | AssetField::EngagementId
                | AssetField::RawImportRecordId
                | AssetField::DiscoveryFlowId
                | AssetField::CreatedAt
                | AssetField::UpdatedAt
                | AssetField::DeletedAt,
                _,
            ) => return Err(FieldError::NotAssignable(field)),
            (_, other) => return Err(mismatch(&other)),
        }
        Ok(())
    }

    /// Updates the last-modified timestamp.
    pub fn touch(&mut self) {
        self.updated_at = timestamp_now();
    }

    /// Returns true if the asset carries a soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The import identifier: the dedicated `external_id` column, falling back
    /// to `import_metadata.external_id`.
    pub fn import_identifier(&self) -> Option<String> {
        non_blank(&self.external_id)
            .map(str::to_string)
            .or_else(|| metadata_external_id(self.import_metadata.as_ref()))
    }
}

/// Returns the trimmed value if it is present and not blank.
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Extracts `external_id` from an import metadata blob.
pub(crate) fn metadata_external_id(metadata: Option<&serde_json::Value>) -> Option<String> {
    match metadata?.get("external_id")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classification of the asset type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetType {
    Server,
    Application,
    Database,
    NetworkDevice,
    StorageDevice,
    SecurityDevice,
    LoadBalancer,
    VirtualMachine,
    Container,
    Workstation,
    /// Type not supplied by the source.
    #[default]
    Other,
    /// Source-specific type label.
    Custom(String),
}

impl AssetType {
    /// Returns the database-compatible representation.
    pub fn as_db_str(&self) -> &str {
        match self {
            AssetType::Server => "server",
            AssetType::Application => "application",
            AssetType::Database => "database",
            AssetType::NetworkDevice => "network_device",
            AssetType::StorageDevice => "storage_device",
            AssetType::SecurityDevice => "security_device",
            AssetType::LoadBalancer => "load_balancer",
            AssetType::VirtualMachine => "virtual_machine",
            AssetType::Container => "container",
            AssetType::Workstation => "workstation",
            AssetType::Other => "other",
            AssetType::Custom(label) => label,
        }
    }
}

impl From<String> for AssetType {
    fn from(raw: String) -> Self {
        match normalize_label(&raw).as_str() {
            "server" => AssetType::Server,
            "application" | "app" => AssetType::Application,
            "database" | "db" => AssetType::Database,
            "network_device" | "network" => AssetType::NetworkDevice,
            "storage_device" | "storage" => AssetType::StorageDevice,
            "security_device" | "firewall" => AssetType::SecurityDevice,
            "load_balancer" => AssetType::LoadBalancer,
            "virtual_machine" | "vm" => AssetType::VirtualMachine,
            "container" => AssetType::Container,
            "workstation" => AssetType::Workstation,
            "other" | "unknown" | "" => AssetType::Other,
            _ => AssetType::Custom(raw.trim().to_string()),
        }
    }
}

impl From<AssetType> for String {
    fn from(asset_type: AssetType) -> Self {
        asset_type.as_db_str().to_string()
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetType::Server => write!(f, "Server"),
            AssetType::Application => write!(f, "Application"),
            AssetType::Database => write!(f, "Database"),
            AssetType::NetworkDevice => write!(f, "Network Device"),
            AssetType::StorageDevice => write!(f, "Storage Device"),
            AssetType::SecurityDevice => write!(f, "Security Device"),
            AssetType::LoadBalancer => write!(f, "Load Balancer"),
            AssetType::VirtualMachine => write!(f, "Virtual Machine"),
            AssetType::Container => write!(f, "Container"),
            AssetType::Workstation => write!(f, "Workstation"),
            AssetType::Other => write!(f, "Other"),
            AssetType::Custom(name) => write!(f, "Custom: {}", name),
        }
    }
}

/// Business criticality level of an asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    /// Returns the database-compatible representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Criticality::Low => "low",
            Criticality::Medium => "medium",
            Criticality::High => "high",
            Criticality::Critical => "critical",
        }
    }
}

impl FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "low" => Ok(Criticality::Low),
            "medium" | "moderate" => Ok(Criticality::Medium),
            "high" => Ok(Criticality::High),
            "critical" => Ok(Criticality::Critical),
            _ => Err(format!("Invalid criticality: {}", s)),
        }
    }
}

impl TryFrom<String> for Criticality {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Criticality> for String {
    fn from(criticality: Criticality) -> Self {
        criticality.as_db_str().to_string()
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criticality::Low => write!(f, "Low"),
            Criticality::Medium => write!(f, "Medium"),
            Criticality::High => write!(f, "High"),
            Criticality::Critical => write!(f, "Critical"),
        }
    }
}

/// Deployment environment of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Environment {
    Production,
    Staging,
    Development,
    Testing,
    /// Custom environment label.
    Custom(String),
}

impl Environment {
    /// Returns the database-compatible representation.
    pub fn as_db_str(&self) -> &str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Custom(label) => label,
        }
    }
}

impl From<String> for Environment {
    fn from(raw: String) -> Self {
        match normalize_label(&raw).as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" | "preprod" => Environment::Staging,
            "development" | "dev" => Environment::Development,
            "testing" | "test" | "qa" => Environment::Testing,
            _ => Environment::Custom(raw.trim().to_string()),
        }
    }
}

impl From<Environment> for String {
    fn from(environment: Environment) -> Self {
        environment.as_db_str().to_string()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "Production"),
            Environment::Staging => write!(f, "Staging"),
            Environment::Development => write!(f, "Development"),
            Environment::Testing => write!(f, "Testing"),
            Environment::Custom(name) => write!(f, "Custom: {}", name),
        }
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}
