//! # Autofacts CLI (`afx`)
//!
//! The `afx` binary is the operational interface for the chunk cache. It
//! provides commands for database initialization, request-path resolution,
//! chunk inspection, the daily QA cycle, statistics, and the operator
//! override that is the only path out of `banned`.
//!
//! ## Usage
//!
//! ```bash
//! afx --config ./config/afx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `afx init` | Create the SQLite database and run schema migrations |
//! | `afx resolve <content-id> --vehicle-key <key>` | Resolve a content request |
//! | `afx get <id>` | Print a chunk's full trust state |
//! | `afx qa run` | Run one review + repair cycle now |
//! | `afx qa watch` | Run the daily QA scheduler loop |
//! | `afx stats` | Trust-level breakdown and run history |
//! | `afx override <id>` | Reset a banned chunk to a fresh quarantined stub |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! afx init --config ./config/afx.toml
//!
//! # Resolve (and, on miss, generate) a torque spec
//! afx resolve torque_spec:front_caliper \
//!     --vehicle-key 2019_honda_accord_2.0t --wait
//!
//! # Run the daily QA cycle once
//! afx qa run
//!
//! # Keep the scheduler running
//! afx qa watch
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use autofacts::config::{self, Config};
use autofacts::db;
use autofacts::get;
use autofacts::migrate;
use autofacts::models::{ChunkKey, TrustStatus};
use autofacts::resolve::{Resolution, Resolver};
use autofacts::scheduler::Scheduler;
use autofacts::stats;
use autofacts::store::sqlite::SqliteStore;
use autofacts::store::FactStore;
use autofacts::vehicle;

/// Autofacts CLI — a lazy generation and trust-lifecycle cache for
/// AI-generated automotive knowledge.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/afx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "afx",
    about = "Autofacts — a trust-lifecycle cache for AI-generated automotive knowledge",
    version,
    long_about = "Autofacts caches expensive AI-generated automotive facts so each one is \
    computed once, verified through a multi-stage QA process, and served for free forever. \
    Unverified or failed content is quarantined and never reaches a client."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/afx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the chunks/qa_runs tables.
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Resolve a content request against the cache.
    ///
    /// On a hit, prints the chunk if it is safe to serve, or the
    /// unavailability reason otherwise. On a miss, creates a quarantined
    /// stub and schedules generation.
    Resolve {
        /// Content id in `{chunk_type}:{component}` form,
        /// e.g. `torque_spec:front_caliper`.
        content_id: String,

        /// Normalized vehicle key, e.g. `2019_honda_accord_2.0t`.
        #[arg(long)]
        vehicle_key: String,

        /// Run generation inline and print the final state instead of
        /// returning `pending`.
        #[arg(long)]
        wait: bool,
    },

    /// Print a chunk's full trust state by row id.
    Get {
        /// Chunk row id (UUID).
        id: String,
    },

    /// QA cycle commands.
    Qa {
        #[command(subcommand)]
        action: QaAction,
    },

    /// Trust-level breakdown and QA run history.
    Stats,

    /// Reset a banned chunk to a fresh quarantined stub.
    ///
    /// This is the only path out of `banned`. The row id and audit counters
    /// are preserved; content, QA state, and regeneration attempts reset.
    Override {
        /// Chunk row id (UUID).
        id: String,
    },
}

/// QA subcommands.
#[derive(Subcommand)]
enum QaAction {
    /// Run one review + repair cycle now and print its summary.
    Run,

    /// Run the scheduler loop: one cycle per review interval, with missed
    /// runs self-healing on the next scan.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Resolve {
            content_id,
            vehicle_key,
            wait,
        } => {
            run_resolve(&cfg, &content_id, &vehicle_key, wait).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Qa { action } => match action {
            QaAction::Run => {
                let (store, resolver) = wire(&cfg).await?;
                let scheduler = Scheduler::new(
                    store,
                    resolver,
                    cfg.scheduler.clone(),
                    cfg.qa.regeneration_cap,
                );
                let summary = scheduler.run_cycle().await?;
                println!("QA cycle complete: {}", summary.notes);
            }
            QaAction::Watch => {
                let (store, resolver) = wire(&cfg).await?;
                let scheduler = Scheduler::new(
                    store,
                    resolver,
                    cfg.scheduler.clone(),
                    cfg.qa.regeneration_cap,
                );
                println!(
                    "QA scheduler running (interval: {}h). Ctrl-C to stop.",
                    cfg.scheduler.review_interval_hours
                );
                scheduler.watch().await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Override { id } => {
            run_override(&cfg, &id).await?;
        }
    }

    Ok(())
}

/// Build the store + resolver stack shared by the request and QA paths.
async fn wire(cfg: &Config) -> Result<(Arc<dyn FactStore>, Resolver)> {
    let pool = db::connect(cfg).await?;
    let store: Arc<dyn FactStore> = Arc::new(SqliteStore::new(pool));
    let resolver = Resolver::from_config(cfg, store.clone())?;
    Ok((store, resolver))
}

async fn run_resolve(cfg: &Config, content_id: &str, vehicle_key: &str, wait: bool) -> Result<()> {
    let (chunk_type, _component) = vehicle::parse_content_id(content_id)?;
    let key = ChunkKey::new(vehicle_key, content_id, chunk_type);

    let (_store, resolver) = wire(cfg).await?;
    let resolution = if wait {
        resolver.resolve_wait(&key).await?
    } else {
        resolver.resolve(&key).await?
    };

    match resolution {
        Resolution::Safe(chunk) => {
            println!("status: safe");
            println!("verified_status: {}", chunk.verified_status.as_str());
            println!("title: {}", chunk.title);
            println!();
            println!("{}", chunk.content_text);
            println!();
            println!("{}", serde_json::to_string_pretty(&chunk.data)?);
        }
        Resolution::Unavailable(reason) => {
            println!("status: unavailable");
            println!("reason: {}", reason.as_str());
        }
        Resolution::Pending => {
            println!("status: pending");
            println!("Generation scheduled; resolve again shortly.");
        }
    }
    Ok(())
}

async fn run_override(cfg: &Config, id: &str) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let store = SqliteStore::new(pool);

    let chunk = store
        .get_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chunk not found: {}", id))?;

    if chunk.verified_status != TrustStatus::Banned {
        anyhow::bail!(
            "chunk {} is '{}', not banned; override only applies to banned chunks",
            id,
            chunk.verified_status.as_str()
        );
    }

    let reset = store.upsert_stub(&chunk.key(), &chunk.title).await?;
    println!(
        "Chunk {} reset to quarantined stub (was banned; {} prior passes kept for audit).",
        reset.id, reset.qa_pass_count
    );
    store.pool().close().await;
    Ok(())
}
