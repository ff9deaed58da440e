//! Ingest and conflicts commands.
//!
//! The CLI owns the transaction: it opens one SQLite session per run, hands it
//! to the ingestion service and commits at the end (or rolls back on error or
//! `--dry-run`).

use anyhow::{Context, Result};
use aw_core::store::{create_pool, SqliteAssetSession, SqliteAssetStore};
use aw_core::{
    Asset, AssetDraft, AssetService, AssetStatus, ConflictReport, DedupConfig, IngestSummary,
    TenantScope, UpsertOptions,
};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Instrument};

use crate::OutputFormat;

/// Arguments of an ingest run.
#[derive(Debug, Clone)]
pub struct IngestArgs {
    /// JSON or YAML file holding a list of records.
    pub records: PathBuf,
    pub scope: TenantScope,
    pub database_url: String,
    /// Use the batch path instead of one call per record.
    pub bulk: bool,
    pub options: UpsertOptions,
    /// Roll back instead of committing.
    pub dry_run: bool,
}

#[derive(Serialize)]
struct IngestedRecord<'a> {
    id: String,
    name: &'a str,
    status: AssetStatus,
}

#[derive(Serialize)]
struct IngestReport<'a> {
    records: Vec<IngestedRecord<'a>>,
    summary: &'a IngestSummary,
    committed: bool,
}

/// Reads a list of records from a `.json`, `.yaml` or `.yml` file.
pub fn load_records(path: &Path) -> Result<Vec<AssetDraft>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let records = if is_json {
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse records file: {}", path.display()))?
    } else {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse records file: {}", path.display()))?
    };
    Ok(records)
}

async fn open_session(database_url: &str) -> Result<SqliteAssetSession> {
    let pool = create_pool(database_url)
        .await
        .with_context(|| format!("Failed to open database: {}", database_url))?;
    let store = SqliteAssetStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    store.begin().await.context("Failed to begin transaction")
}

async fn ingest_all(
    service: &mut AssetService<SqliteAssetSession>,
    drafts: &[AssetDraft],
    args: &IngestArgs,
) -> Result<Vec<(Asset, AssetStatus)>> {
    if args.bulk {
        return service
            .bulk_create_or_update(drafts, &args.scope, &args.options)
            .await
            .context("Batch ingestion failed");
    }

    let mut results = Vec::with_capacity(drafts.len());
    for (position, draft) in drafts.iter().enumerate() {
        let result = service
            .create_or_update(draft, &args.scope, &args.options)
            .await
            .with_context(|| format!("Failed to ingest record {}", position + 1))?;
        results.push(result);
    }
    Ok(results)
}

/// Runs the ingest command.
pub async fn run_ingest(args: IngestArgs, dedup: &DedupConfig, format: OutputFormat) -> Result<()> {
    let drafts = load_records(&args.records)?;
    let session = open_session(&args.database_url).await?;
    let mut service = AssetService::with_config(session, dedup)?;

    let span = aw_observability::ingest_span!(args.scope, records = drafts.len(), bulk = args.bulk);
    let started = Instant::now();
    let outcome = ingest_all(&mut service, &drafts, &args).instrument(span).await;

    let session = service.into_store();
    let results = match outcome {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, "Ingestion failed, rolling back");
            session.rollback().await.context("Failed to roll back")?;
            return Err(err);
        }
    };

    if args.dry_run {
        session.rollback().await.context("Failed to roll back")?;
        info!("Dry run, changes rolled back");
    } else {
        session.commit().await.context("Failed to commit")?;
    }

    let summary = IngestSummary::from_results(&results, started.elapsed());
    print_results(&results, &summary, !args.dry_run, format)
}

fn print_results(
    results: &[(Asset, AssetStatus)],
    summary: &IngestSummary,
    committed: bool,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        let report = IngestReport {
            records: results
                .iter()
                .map(|(asset, status)| IngestedRecord {
                    id: asset.id.to_string(),
                    name: &asset.name,
                    status: *status,
                })
                .collect(),
            summary,
            committed,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Ingested Records".bold());
    println!("────────────────");
    for (asset, status) in results {
        let label = match status {
            AssetStatus::Created => status.as_str().green(),
            AssetStatus::Existed => status.as_str().normal(),
            AssetStatus::Updated => status.as_str().cyan(),
            AssetStatus::Conflict => status.as_str().yellow(),
        };
        println!("  {:<8} {} ({})", label, asset.name, asset.id);
    }

    println!();
    println!("{}", "Summary".bold());
    println!("───────");
    println!("  Created:   {}", summary.created);
    println!("  Existed:   {}", summary.existed);
    println!("  Updated:   {}", summary.updated);
    println!("  Conflicts: {}", summary.conflicts);
    println!("  Duration:  {} ms", summary.duration_ms);
    if committed {
        println!("{}", "Changes committed.".green().bold());
    } else {
        println!("{}", "Dry run: changes rolled back.".yellow().bold());
    }
    Ok(())
}

/// Runs the conflicts command. Never writes.
pub async fn run_conflicts(
    records: &Path,
    scope: &TenantScope,
    database_url: &str,
    dedup: &DedupConfig,
    format: OutputFormat,
) -> Result<()> {
    let drafts = load_records(records)?;
    let session = open_session(database_url).await?;
    let mut service = AssetService::with_config(session, dedup)?;

    let report = service
        .prepare_conflicts(drafts, scope)
        .await
        .context("Conflict detection failed")?;
    service
        .into_store()
        .rollback()
        .await
        .context("Failed to close transaction")?;

    print_conflicts(&report, format)
}

fn print_conflicts(report: &ConflictReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", "Conflict Report".bold());
    println!("───────────────");
    println!("  Conflict-free records: {}", report.conflict_free.len());
    println!("  Conflicts: {}", report.conflicts.len());
    for conflict in &report.conflicts {
        println!(
            "  - {} {} = {} (existing {})",
            "conflict".yellow(),
            conflict.conflict_type,
            conflict.conflict_key,
            conflict.existing_asset_id
        );
    }
    Ok(())
}
