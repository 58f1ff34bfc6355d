//! kgc - knowledge-graph consolidation CLI
//!
//! Consolidates interview extraction files into the store and runs the
//! derived passes (confidence refresh, relationships, patterns). Results are
//! printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgc_common::config::resolve_config_path;
use kgc_common::{ConsolidationConfig, EntityType};
use kgc_engine::db::entities::EntityFilter;
use kgc_engine::{BatchOptions, BatchRunner, ConsolidationEngine, ExtractionDocument};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for kgc
#[derive(Parser, Debug)]
#[command(name = "kgc")]
#[command(about = "Knowledge-graph consolidation for interview extractions")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "KGC_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(short, long, env = "KGC_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consolidate an extraction file ({"interviews": [...]})
    Consolidate {
        file: PathBuf,
        /// Skip the confidence refresh after the batch
        #[arg(long)]
        no_refresh: bool,
        /// Skip relationship discovery after the batch
        #[arg(long)]
        no_relationships: bool,
        /// Skip pattern recognition after the batch
        #[arg(long)]
        no_patterns: bool,
    },
    /// Discover relationships between stored entities
    Relationships,
    /// Recompute patterns and print the high-priority ones
    Patterns,
    /// Recompute consensus confidence for every entity
    Refresh,
    /// List entities of one type
    List {
        /// Entity type (e.g. pain_point or pain_points)
        entity_type: String,
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Only entities merged from several interviews
        #[arg(long)]
        consolidated: bool,
        /// Only entities with contradictions
        #[arg(long)]
        contradictions: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Merge history of an entity
    History { entity_id: String },
    /// Store statistics
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kgc=info,kgc_engine=info,kgc_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config =
        ConsolidationConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.storage.database_path = Some(database);
    }

    info!("Database: {}", config.storage.database_path().display());
    let engine = ConsolidationEngine::open(config)
        .await
        .context("Failed to open consolidation store")?;

    match args.command {
        Command::Consolidate {
            file,
            no_refresh,
            no_relationships,
            no_patterns,
        } => {
            let document = ExtractionDocument::load(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            info!(interviews = document.interviews.len(), "Loaded extraction file");

            let cancel_token = CancellationToken::new();
            let ctrl_c_token = cancel_token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, stopping after the current interview");
                    ctrl_c_token.cancel();
                }
            });

            let options = BatchOptions {
                refresh_confidence: !no_refresh,
                discover_relationships: !no_relationships,
                recognize_patterns: !no_patterns,
            };
            let report = BatchRunner::new(&engine, options)
                .run(&document.interviews, &cancel_token)
                .await
                .context("Batch failed")?;
            print_json(&report)?;

            if !report.failed.is_empty() {
                anyhow::bail!("{} interview(s) failed and were rolled back", report.failed.len());
            }
        }
        Command::Relationships => {
            let report = engine.discoverer().run().await?;
            print_json(&report)?;
        }
        Command::Patterns => {
            let report = engine.recognizer().run().await?;
            info!(patterns = report.patterns, "Patterns recomputed");
            let high = engine.store().patterns(None, true).await?;
            print_json(&high)?;
        }
        Command::Refresh => {
            let updated = engine.orchestrator().refresh_confidence().await?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Command::List {
            entity_type,
            min_confidence,
            consolidated,
            contradictions,
            limit,
        } => {
            let entity_type: EntityType = entity_type.parse()?;
            let filter = EntityFilter {
                min_confidence,
                is_consolidated: consolidated.then_some(true),
                has_contradictions: contradictions.then_some(true),
                limit,
            };
            let entities = engine.store().entities(entity_type, &filter).await?;
            print_json(&entities)?;
        }
        Command::History { entity_id } => {
            let history = engine.store().audit_history(&entity_id).await?;
            print_json(&history)?;
        }
        Command::Stats => {
            let stats = engine.store().stats().await?;
            print_json(&stats)?;
        }
    }

    Ok(())
}
