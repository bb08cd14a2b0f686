//! Command-line front end for a persistent entity store.
//!
//! ```text
//! entity-resolver --store ./entities.db import carriers.json
//! entity-resolver --store ./entities.db resolve page1-response.json
//! entity-resolver --store ./entities.db show E2
//! ```
//!
//! Results are printed to stdout as JSON lines; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use entity_resolver::audit::JsonLinesAuditLog;
use entity_resolver::extraction::{CandidateSource, JsonResponseSource};
use entity_resolver::storage::persistent::{open_store, PersistentConfig};
use entity_resolver::{
    CandidateEntity, EntityId, EntityStore, ResolutionOutcome, Resolver, ResolverConfig,
    ResolverRuntime, RuntimeConfig, VERSION,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store directory
    #[arg(short, long, global = true, default_value = "./entities.db")]
    store: PathBuf,

    /// JSON resolver configuration; defaults apply to missing keys
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create canonical entities from a JSON array
    Import {
        /// File of entity objects (name, type, optional id, aliases, address, contact)
        file: PathBuf,
    },

    /// Resolve candidates from a candidate list or a saved model response
    Resolve {
        /// JSON file to read
        input: PathBuf,

        /// Worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Append every result to this JSON-lines audit log
        #[arg(short, long)]
        audit: Option<PathBuf>,

        /// Register unmatched candidates as new canonical entities
        #[arg(long)]
        create_unmatched: bool,
    },

    /// Print a canonical entity (merged IDs are followed)
    Show {
        /// Entity ID
        id: String,
    },

    /// Display the version
    Version,
}

#[derive(Deserialize)]
struct ImportRecord {
    #[serde(default)]
    id: Option<EntityId>,
    #[serde(flatten)]
    candidate: CandidateEntity,
}

fn configure_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ResolverConfig> {
    let Some(path) = path else {
        return Ok(ResolverConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    ResolverConfig::from_json(&json).map_err(|e| anyhow!("{}: {e}", path.display()))
}

fn import(store: &dyn EntityStore, file: &Path) -> Result<()> {
    let json = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<ImportRecord> = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a JSON array of entities", file.display()))?;

    let mut created = 0usize;
    for (index, record) in records.into_iter().enumerate() {
        let id = record.id.unwrap_or_default();
        let outcome = record
            .candidate
            .to_entity(id)
            .map_err(anyhow::Error::from)
            .and_then(|entity| store.create(entity).map_err(anyhow::Error::from));
        match outcome {
            Ok(id) => {
                println!("{id}");
                created += 1;
            }
            Err(e) => warn!(index, error = %e, "entity not imported"),
        }
    }
    info!(created, "import finished");
    Ok(())
}

fn resolve(
    resolver: Resolver,
    input: &Path,
    workers: usize,
    audit: Option<&Path>,
    create_unmatched: bool,
) -> Result<()> {
    let report = JsonResponseSource::new(input).candidates()?;
    for skipped in &report.skipped {
        warn!(location = %skipped.location, reason = %skipped.reason, "candidate skipped");
    }

    let resolver = match audit {
        Some(path) => resolver.with_audit(Arc::new(JsonLinesAuditLog::open(path)?)),
        None => resolver,
    };
    let runtime = ResolverRuntime::new(
        resolver,
        RuntimeConfig {
            workers,
            ..RuntimeConfig::default()
        },
    )?;

    let mut failed = 0usize;
    for result in runtime.resolve_batch(report.candidates) {
        match result {
            Ok(mapping) => {
                println!("{}", serde_json::to_string(&mapping)?);
                if create_unmatched && mapping.outcome == ResolutionOutcome::NoMatch {
                    runtime.resolver().create_entity(&mapping.original_entity)?;
                }
            }
            Err(e) => {
                warn!(error = %e, "candidate not resolved");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} candidate(s) could not be resolved"));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    if matches!(cli.command, Commands::Version) {
        println!("entity-resolver v{VERSION}");
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(
        open_store(&cli.store, Some(PersistentConfig::default()))
            .with_context(|| format!("Failed to open store {}", cli.store.display()))?,
    );

    match cli.command {
        Commands::Import { file } => import(store.as_ref(), &file),
        Commands::Resolve {
            input,
            workers,
            audit,
            create_unmatched,
        } => {
            let resolver = Resolver::with_config(store, config)?;
            resolve(resolver, &input, workers, audit.as_deref(), create_unmatched)
        }
        Commands::Show { id } => {
            let entity = store
                .get(&EntityId::from(id.as_str()))?
                .ok_or_else(|| anyhow!("Entity {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&entity)?);
            Ok(())
        }
        Commands::Version => Ok(()),
    }
}
