//! Asset Warden CLI
//!
//! Command-line interface for ingesting infrastructure inventory records.

use anyhow::{Context, Result};
use aw_core::{FieldPolicy, MergeStrategy, TenantScope, UpsertOptions};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;
mod config;

use commands::{run_conflicts, run_ingest, IngestArgs};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "asset-warden")]
#[command(version)]
#[command(about = "Identity resolution and merging for infrastructure inventory imports", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

/// Tenant and database selection shared by data commands.
#[derive(Args)]
struct TargetArgs {
    /// Client account identifier
    #[arg(long, env = "ASSET_WARDEN_CLIENT_ACCOUNT_ID")]
    client_account: Option<String>,

    /// Engagement identifier
    #[arg(long, env = "ASSET_WARDEN_ENGAGEMENT_ID")]
    engagement: Option<String>,

    /// Database URL (overrides the configuration file)
    #[arg(short, long, env = "ASSET_WARDEN_DATABASE_URL")]
    database: Option<String>,
}

impl TargetArgs {
    fn scope(&self) -> Result<TenantScope> {
        TenantScope::parse(self.client_account.as_deref(), self.engagement.as_deref())
            .context("Invalid tenant scope")
    }

    fn database_url(&self, config: &AppConfig) -> String {
        self.database
            .clone()
            .unwrap_or_else(|| config.database_url.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest records from a JSON or YAML file
    Ingest {
        /// Records file
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Process the file as one batch with a single flush
        #[arg(long)]
        bulk: bool,

        /// Merge into matched assets
        #[arg(long)]
        upsert: bool,

        /// Merge strategy (enrich, overwrite)
        #[arg(long)]
        strategy: Option<MergeStrategy>,

        /// Report matches as conflicts and never modify them
        #[arg(long, conflicts_with = "upsert")]
        detect_only: bool,

        /// Roll back instead of committing
        #[arg(long)]
        dry_run: bool,
    },

    /// Report which records collide with existing assets
    Conflicts {
        /// Records file
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let loaded = AppConfig::load(&config_path);
    let using_defaults = loaded.is_err();
    let config = loaded.unwrap_or_default().with_env_overrides()?;

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = tracing::Level::DEBUG;
    }
    if cli.format == OutputFormat::Json {
        logging.json_format = true;
    }
    aw_observability::init_logging_with_config(logging);

    if using_defaults && cli.verbose {
        eprintln!("Using default configuration (no config file found)");
    }

    // Execute command
    match cli.command {
        Commands::Ingest {
            file,
            target,
            bulk,
            upsert,
            strategy,
            detect_only,
            dry_run,
        } => {
            let mut options = config.dedup.upsert_options();
            options.allow_upsert |= upsert;
            options.conflict_detection_only = detect_only;
            if let Some(strategy) = strategy {
                options.merge_strategy = strategy;
            }
            cmd_ingest(file, &target, bulk, options, dry_run, &config, cli.format).await
        }
        Commands::Conflicts { file, target } => {
            let scope = target.scope()?;
            run_conflicts(
                &file,
                &scope,
                &target.database_url(&config),
                &config.dedup,
                cli.format,
            )
            .await
        }
        Commands::Validate { config: cfg_path } => cmd_validate(cfg_path.unwrap_or(config_path)),
        Commands::Config => cmd_config(&config, cli.format),
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("com", "asset-warden", "asset-warden") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/default.yaml")
    }
}

async fn cmd_ingest(
    records: PathBuf,
    target: &TargetArgs,
    bulk: bool,
    options: UpsertOptions,
    dry_run: bool,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<()> {
    let args = IngestArgs {
        records,
        scope: target.scope()?,
        database_url: target.database_url(config),
        bulk,
        options,
        dry_run,
    };
    run_ingest(args, &config.dedup, format).await
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    println!(
        "Validating configuration: {}",
        config_path.display().to_string().cyan()
    );

    let config = match AppConfig::load(&config_path).and_then(AppConfig::with_env_overrides) {
        Ok(config) => config,
        Err(e) => {
            println!("{}: {:#}", "Configuration file error".red().bold(), e);
            std::process::exit(1);
        }
    };

    let policy = FieldPolicy::standard();
    let errors: Vec<String> = [
        policy.validate().err().map(|e| e.to_string()),
        config.dedup.validate(&policy).err().map(|e| e.to_string()),
    ]
    .into_iter()
    .flatten()
    .collect();

    for error in &errors {
        println!("  {} {}", "✗".red(), error);
    }

    // Summary
    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Database: {}", config.database_url);
    println!("  Max predicate size: {}", config.dedup.max_predicate_size);
    println!("  Upsert: {}", config.dedup.allow_upsert);
    println!("  Merge strategy: {}", config.dedup.merge_strategy);
    match &config.dedup.field_allowlist {
        Some(fields) => println!("  Field allowlist: {} fields", fields.len()),
        None => println!("  Field allowlist: policy default"),
    }

    println!();
    if errors.is_empty() {
        println!("{}", "Configuration is valid.".green().bold());
        Ok(())
    } else {
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above."
                .red()
                .bold()
        );
        std::process::exit(1);
    }
}

fn cmd_config(config: &AppConfig, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        println!("{}", "Current Configuration".bold());
        println!("─────────────────────────");
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(())
}
