//! SQLite-backed record store.
//!
//! A [`SqliteAssetSession`] wraps one `sqlx` transaction. Staged writes are
//! applied on flush inside a fresh `SAVEPOINT`; a failing flush is rolled back
//! to that savepoint so the enclosing transaction stays usable. The caller
//! decides whether to [`commit`](SqliteAssetSession::commit) or
//! [`rollback`](SqliteAssetSession::rollback).

use super::{
    escape_like_pattern, AssetFilter, AssetRecordStore, PendingWrite, StoreError, StoreResult,
    DEFAULT_MAX_PREDICATE_SIZE,
};
use crate::models::{Asset, AssetType, Criticality, Environment};
use crate::scope::TenantScope;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqlitePool};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, client_account_id, engagement_id, name, asset_type, hostname, \
    fully_qualified_domain_name, ip_address, mac_address, operating_system, os_version, \
    cpu_cores, memory_gb, storage_gb, is_virtual, environment, business_owner, technical_owner, \
    department, location, criticality, description, external_id, custom_attributes, raw_data, \
    import_metadata, raw_import_record_id, discovery_flow_id, created_at, updated_at, deleted_at";

/// Handle over a SQLite pool holding the `assets` table.
#[derive(Clone)]
pub struct SqliteAssetStore {
    pool: SqlitePool,
    max_predicate_size: usize,
}

impl SqliteAssetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_predicate_size: DEFAULT_MAX_PREDICATE_SIZE,
        }
    }

    /// Sets the largest IN-list a single read may carry.
    pub fn with_max_predicate_size(mut self, max_predicate_size: usize) -> Self {
        self.max_predicate_size = max_predicate_size.max(1);
        self
    }

    /// Runs the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running SQLite migrations");
        sqlx::migrate!("src/store/migrations/sqlite")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully");
        Ok(())
    }

    /// Starts a new session in its own transaction.
    ///
    /// The transaction is opened with `BEGIN IMMEDIATE`, so a second writer
    /// waits for the first to finish instead of failing with `SQLITE_BUSY`
    /// when it upgrades its read lock.
    pub async fn begin(&self) -> StoreResult<SqliteAssetSession> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        Ok(SqliteAssetSession {
            tx,
            pending: Vec::new(),
            savepoint_seq: 0,
            open_savepoint: None,
            max_predicate_size: self.max_predicate_size,
        })
    }

    /// Number of live assets in a scope, as seen outside any open session.
    pub async fn count(&self, scope: &TenantScope) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM assets WHERE client_account_id = ? AND engagement_id = ? AND deleted_at IS NULL",
        )
        .bind(scope.client_account_id.to_string())
        .bind(scope.engagement_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// A unit of work over the `assets` table.
pub struct SqliteAssetSession {
    tx: Transaction<'static, Sqlite>,
    pending: Vec<PendingWrite>,
    savepoint_seq: u32,
    /// Savepoint left open by a flush whose own rollback failed.
    open_savepoint: Option<String>,
    max_predicate_size: usize,
}

impl SqliteAssetSession {
    /// Commits the transaction.
    pub async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to commit: {}", e)))
    }

    /// Rolls back the whole transaction.
    pub async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to roll back: {}", e)))
    }

    async fn release_savepoint(&mut self, name: &str, rollback: bool) -> StoreResult<()> {
        if rollback {
            sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name))
                .execute(&mut *self.tx)
                .await?;
        }
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AssetRecordStore for SqliteAssetSession {
    async fn find(&mut self, scope: &TenantScope, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        if filter.predicate_size() > self.max_predicate_size {
            return Err(StoreError::Query(format!(
                "Predicate of {} values exceeds the limit of {}",
                filter.predicate_size(),
                self.max_predicate_size
            )));
        }

        let mut query = format!(
            "SELECT {} FROM assets WHERE client_account_id = ? AND engagement_id = ? AND deleted_at IS NULL",
            ASSET_COLUMNS
        );
        let mut params: Vec<String> = vec![
            scope.client_account_id.to_string(),
            scope.engagement_id.to_string(),
        ];
        push_predicate(filter, &mut query, &mut params);
        query.push_str(" ORDER BY created_at ASC, id ASC");

        let mut sqlx_query = sqlx::query_as::<_, SqliteAssetRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows: Vec<SqliteAssetRow> = sqlx_query.fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    fn stage_insert(&mut self, asset: Asset) {
        self.pending.push(PendingWrite::Insert(asset));
    }

    fn stage_update(&mut self, asset: Asset) {
        self.pending.push(PendingWrite::Update(asset));
    }

    async fn flush(&mut self) -> StoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        self.savepoint_seq += 1;
        let savepoint = format!("aw_flush_{}", self.savepoint_seq);
        sqlx::query(&format!("SAVEPOINT {}", savepoint))
            .execute(&mut *self.tx)
            .await?;

        let mut result = Ok(());
        for write in &pending {
            result = execute_write(&mut self.tx, write).await;
            if result.is_err() {
                break;
            }
        }

        match result {
            Ok(()) => {
                self.release_savepoint(&savepoint, false).await?;
                debug!(writes = pending.len(), "Flushed staged asset writes");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.release_savepoint(&savepoint, true).await {
                    warn!(error = %rollback_err, savepoint = %savepoint, "Failed to roll back flush savepoint");
                    self.open_savepoint = Some(savepoint);
                }
                Err(err)
            }
        }
    }

    async fn rollback_to_usable(&mut self) -> StoreResult<()> {
        self.pending.clear();
        if let Some(savepoint) = self.open_savepoint.take() {
            self.release_savepoint(&savepoint, true).await?;
        }
        Ok(())
    }

    fn max_predicate_size(&self) -> usize {
        self.max_predicate_size
    }
}

fn placeholders(count: usize) -> String {
    if count == 0 {
        return "NULL".to_string();
    }
    vec!["?"; count].join(", ")
}

fn push_predicate(filter: &AssetFilter, query: &mut String, params: &mut Vec<String>) {
    match filter {
        AssetFilter::NameAndType { name, asset_type } => {
            query.push_str(" AND name = ? AND asset_type = ?");
            params.push(name.clone());
            params.push(asset_type.as_db_str().to_string());
        }
        AssetFilter::AnyIdentifier {
            hostname,
            fqdn,
            ip_address,
        } => {
            let mut clauses = Vec::new();
            for (column, value) in [
                ("hostname", hostname),
                ("fully_qualified_domain_name", fqdn),
                ("ip_address", ip_address),
            ] {
                if let Some(value) = value {
                    clauses.push(format!("{} = ?", column));
                    params.push(value.clone());
                }
            }
            if clauses.is_empty() {
                query.push_str(" AND 0");
            } else {
                query.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            }
        }
        AssetFilter::NameContains(needle) => {
            query.push_str(" AND lower(name) LIKE ? ESCAPE '\\'");
            params.push(format!("%{}%", escape_like_pattern(&needle.to_lowercase())));
        }
        AssetFilter::NameContainsAny(needles) => {
            if needles.is_empty() {
                query.push_str(" AND 0");
                return;
            }
            let clauses = vec!["lower(name) LIKE ? ESCAPE '\\'"; needles.len()];
            query.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            for needle in needles {
                params.push(format!("%{}%", escape_like_pattern(&needle.to_lowercase())));
            }
        }
        AssetFilter::ExternalId(value) => {
            query.push_str(
                " AND (external_id = ? OR CAST(json_extract(import_metadata, '$.external_id') AS TEXT) = ?)",
            );
            params.push(value.clone());
            params.push(value.clone());
        }
        AssetFilter::NameIn(values) => push_in(" AND name IN ", values, query, params),
        AssetFilter::HostnameIn(values) => push_in(" AND hostname IN ", values, query, params),
        AssetFilter::FqdnIn(values) => {
            push_in(" AND fully_qualified_domain_name IN ", values, query, params)
        }
        AssetFilter::IpAddressIn(values) => push_in(" AND ip_address IN ", values, query, params),
        AssetFilter::ExternalIdIn(values) => {
            let list = placeholders(values.len());
            query.push_str(&format!(
                " AND (external_id IN ({list}) OR CAST(json_extract(import_metadata, '$.external_id') AS TEXT) IN ({list}))"
            ));
            params.extend(values.iter().cloned());
            params.extend(values.iter().cloned());
        }
    }
}

fn push_in(prefix: &str, values: &[String], query: &mut String, params: &mut Vec<String>) {
    query.push_str(prefix);
    query.push('(');
    query.push_str(&placeholders(values.len()));
    query.push(')');
    params.extend(values.iter().cloned());
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn optional_json(value: &Option<serde_json::Value>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

/// Column values of an asset in `ASSET_COLUMNS` order, minus the key columns.
struct AssetColumns {
    name: String,
    asset_type: String,
    hostname: Option<String>,
    fqdn: Option<String>,
    ip_address: Option<String>,
    mac_address: Option<String>,
    operating_system: Option<String>,
    os_version: Option<String>,
    cpu_cores: Option<i64>,
    memory_gb: Option<f64>,
    storage_gb: Option<f64>,
    is_virtual: Option<bool>,
    environment: Option<String>,
    business_owner: Option<String>,
    technical_owner: Option<String>,
    department: Option<String>,
    location: Option<String>,
    criticality: Option<String>,
    description: Option<String>,
    external_id: Option<String>,
    custom_attributes: String,
    raw_data: Option<String>,
    import_metadata: Option<String>,
    raw_import_record_id: Option<String>,
    discovery_flow_id: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl AssetColumns {
    fn encode(asset: &Asset) -> StoreResult<Self> {
        Ok(Self {
            name: asset.name.clone(),
            asset_type: asset.asset_type.as_db_str().to_string(),
            hostname: asset.hostname.clone(),
            fqdn: asset.fully_qualified_domain_name.clone(),
            ip_address: asset.ip_address.clone(),
            mac_address: asset.mac_address.clone(),
            operating_system: asset.operating_system.clone(),
            os_version: asset.os_version.clone(),
            cpu_cores: asset.cpu_cores,
            memory_gb: asset.memory_gb,
            storage_gb: asset.storage_gb,
            is_virtual: asset.is_virtual,
            environment: asset.environment.as_ref().map(|e| e.as_db_str().to_string()),
            business_owner: asset.business_owner.clone(),
            technical_owner: asset.technical_owner.clone(),
            department: asset.department.clone(),
            location: asset.location.clone(),
            criticality: asset.criticality.map(|c| c.as_db_str().to_string()),
            description: asset.description.clone(),
            external_id: asset.external_id.clone(),
            custom_attributes: serde_json::to_string(&asset.custom_attributes)?,
            raw_data: optional_json(&asset.raw_data)?,
            import_metadata: optional_json(&asset.import_metadata)?,
            raw_import_record_id: asset.raw_import_record_id.map(|id| id.to_string()),
            discovery_flow_id: asset.discovery_flow_id.map(|id| id.to_string()),
            created_at: timestamp(&asset.created_at),
            updated_at: timestamp(&asset.updated_at),
            deleted_at: asset.deleted_at.as_ref().map(timestamp),
        })
    }

    fn bind<'q>(
        self,
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.name)
            .bind(self.asset_type)
            .bind(self.hostname)
            .bind(self.fqdn)
            .bind(self.ip_address)
            .bind(self.mac_address)
            .bind(self.operating_system)
            .bind(self.os_version)
            .bind(self.cpu_cores)
            .bind(self.memory_gb)
            .bind(self.storage_gb)
            .bind(self.is_virtual)
            .bind(self.environment)
            .bind(self.business_owner)
            .bind(self.technical_owner)
            .bind(self.department)
            .bind(self.location)
            .bind(self.criticality)
            .bind(self.description)
            .bind(self.external_id)
            .bind(self.custom_attributes)
            .bind(self.raw_data)
            .bind(self.import_metadata)
            .bind(self.raw_import_record_id)
            .bind(self.discovery_flow_id)
            .bind(self.created_at)
            .bind(self.updated_at)
            .bind(self.deleted_at)
    }
}

async fn execute_write(conn: &mut SqliteConnection, write: &PendingWrite) -> StoreResult<()> {
    match write {
        PendingWrite::Insert(asset) => {
            let query = sqlx::query(
                r#"
                INSERT INTO assets (
                    id, client_account_id, engagement_id, name, asset_type, hostname,
                    fully_qualified_domain_name, ip_address, mac_address, operating_system, os_version,
                    cpu_cores, memory_gb, storage_gb, is_virtual, environment, business_owner,
                    technical_owner, department, location, criticality, description, external_id,
                    custom_attributes, raw_data, import_metadata, raw_import_record_id,
                    discovery_flow_id, created_at, updated_at, deleted_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(asset.id.to_string())
            .bind(asset.client_account_id.to_string())
            .bind(asset.engagement_id.to_string());

            AssetColumns::encode(asset)?.bind(query).execute(conn).await?;
        }
        PendingWrite::Update(asset) => {
            let query = sqlx::query(
                r#"
                UPDATE assets SET
                    name = ?, asset_type = ?, hostname = ?, fully_qualified_domain_name = ?,
                    ip_address = ?, mac_address = ?, operating_system = ?, os_version = ?,
                    cpu_cores = ?, memory_gb = ?, storage_gb = ?, is_virtual = ?, environment = ?,
                    business_owner = ?, technical_owner = ?, department = ?, location = ?,
                    criticality = ?, description = ?, external_id = ?, custom_attributes = ?,
                    raw_data = ?, import_metadata = ?, raw_import_record_id = ?,
                    discovery_flow_id = ?, created_at = ?, updated_at = ?, deleted_at = ?
                WHERE id = ? AND client_account_id = ? AND engagement_id = ?
                "#,
            );

            let result = AssetColumns::encode(asset)?
                .bind(query)
                .bind(asset.id.to_string())
                .bind(asset.client_account_id.to_string())
                .bind(asset.engagement_id.to_string())
                .execute(conn)
                .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Query(format!("Asset {} not found", asset.id)));
            }
        }
    }
    Ok(())
}

// Helper structs for SQLx row mapping

#[derive(sqlx::FromRow)]
struct SqliteAssetRow {
    id: String,
    client_account_id: String,
    engagement_id: String,
    name: String,
    asset_type: String,
    hostname: Option<String>,
    fully_qualified_domain_name: Option<String>,
    ip_address: Option<String>,
    mac_address: Option<String>,
    operating_system: Option<String>,
    os_version: Option<String>,
    cpu_cores: Option<i64>,
    memory_gb: Option<f64>,
    storage_gb: Option<f64>,
    is_virtual: Option<bool>,
    environment: Option<String>,
    business_owner: Option<String>,
    technical_owner: Option<String>,
    department: Option<String>,
    location: Option<String>,
    criticality: Option<String>,
    description: Option<String>,
    external_id: Option<String>,
    custom_attributes: String,
    raw_data: Option<String>,
    import_metadata: Option<String>,
    raw_import_record_id: Option<String>,
    discovery_flow_id: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Serialization(format!("Invalid UUID: {}", e)))
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("Invalid timestamp: {}", e)))
}

fn parse_json(value: Option<String>) -> StoreResult<Option<serde_json::Value>> {
    value
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(StoreError::from)
}

impl TryFrom<SqliteAssetRow> for Asset {
    type Error = StoreError;

    fn try_from(row: SqliteAssetRow) -> Result<Self, Self::Error> {
        let criticality = row
            .criticality
            .map(|c| c.parse::<Criticality>())
            .transpose()
            .map_err(StoreError::Serialization)?;

        let custom_attributes = serde_json::from_str(&row.custom_attributes)
            .map_err(|e| StoreError::Serialization(format!("Invalid custom_attributes JSON: {}", e)))?;

        Ok(Asset {
            id: parse_uuid(&row.id)?,
            client_account_id: parse_uuid(&row.client_account_id)?,
            engagement_id: parse_uuid(&row.engagement_id)?,
            name: row.name,
            asset_type: AssetType::from(row.asset_type),
            hostname: row.hostname,
            fully_qualified_domain_name: row.fully_qualified_domain_name,
            ip_address: row.ip_address,
            mac_address: row.mac_address,
            operating_system: row.operating_system,
            os_version: row.os_version,
            cpu_cores: row.cpu_cores,
            memory_gb: row.memory_gb,
            storage_gb: row.storage_gb,
            is_virtual: row.is_virtual,
            environment: row.environment.map(Environment::from),
            business_owner: row.business_owner,
            technical_owner: row.technical_owner,
            department: row.department,
            location: row.location,
            criticality,
            description: row.description,
            external_id: row.external_id,
            custom_attributes,
            raw_data: parse_json(row.raw_data)?,
            import_metadata: parse_json(row.import_metadata)?,
            raw_import_record_id: row.raw_import_record_id.as_deref().map(parse_uuid).transpose()?,
            discovery_flow_id: row.discovery_flow_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
