//! # transcript-sync CLI (`tsync`)
//!
//! ## Usage
//!
//! ```bash
//! tsync --config ./config/tsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tsync init` | Create the SQLite database and schema |
//! | `tsync serve` | Start the HTTP server (and the periodic sweep if enabled) |
//! | `tsync ingest-item <url>` | Ingest one item |
//! | `tsync ingest-source <url>` | Ingest a channel or playlist in the foreground |
//! | `tsync check <source-id>` | Ask whether a source has new items |
//! | `tsync sweep` | Run one sweep over all known sources |
//! | `tsync retry-skips <source-id>` | Clear a source's skip records |
//! | `tsync sources` | List registered sources |
//! | `tsync stats` | Database overview |
//! | `tsync completions <shell>` | Print shell completions |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level);
//! command results go to stdout.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use transcript_sync::config;
use transcript_sync::engine::Engine;
use transcript_sync::migrate;
use transcript_sync::orchestrator::SourceRequest;
use transcript_sync::pipeline::ProcessOptions;
use transcript_sync::server;
use transcript_sync::sources;
use transcript_sync::stats;
use transcript_sync::ytdlp::item_ref_from_url;

/// transcript-sync: bulk ingestion and incremental sync of video sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tsync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "tsync", version, about = "Bulk transcript ingestion and source sync")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Ingest a single item by URL.
    IngestItem {
        url: String,

        /// File the item under this source instead of its owner name.
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Ingest new items of a channel or playlist and print the job result.
    IngestSource {
        url: String,

        /// Maximum number of items to list from the source.
        #[arg(long, default_value_t = 50)]
        max_items: usize,

        /// Source ID to file items under (resolved from the URL otherwise).
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Check whether a registered source has items not yet ingested.
    Check { source_id: String },

    /// Run one sweep over all registered sources.
    Sweep,

    /// Delete the skip records of a source so its items are retried.
    RetrySkips { source_id: String },

    /// List registered sources.
    Sources,

    /// Show database statistics.
    Stats,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "tsync", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::open(&cfg).await?);
            server::run_server(engine).await?;
        }
        Commands::IngestItem { url, source_id } => {
            let engine = Engine::open(&cfg).await?;
            let item = item_ref_from_url(&url)?;
            let opts = ProcessOptions {
                skip_if_known: true,
                source_id,
            };
            let outcome = engine.pipeline.process(&item, &opts).await;
            print_json(&outcome)?;
        }
        Commands::IngestSource {
            url,
            max_items,
            source_id,
        } => {
            anyhow::ensure!(max_items > 0, "--max-items must be greater than 0");
            let engine = Engine::open(&cfg).await?;
            let snapshot = engine
                .orchestrator
                .run_foreground(SourceRequest {
                    source_url: url,
                    max_items,
                    source_id,
                })
                .await;
            print_json(&snapshot)?;
        }
        Commands::Check { source_id } => {
            let engine = Engine::open(&cfg).await?;
            let decision = engine.sweeper.checker().needs_sync(&source_id).await?;
            print_json(&decision)?;
        }
        Commands::Sweep => {
            let engine = Engine::open(&cfg).await?;
            let report = engine.sweeper.run().await?;
            print_json(&report)?;
        }
        Commands::RetrySkips { source_id } => {
            let engine = Engine::open(&cfg).await?;
            let cleared = engine.store.clear_skips(&source_id).await?;
            println!("Cleared {} skip records for {}.", cleared, source_id);
        }
        Commands::Sources => {
            let engine = Engine::open(&cfg).await?;
            sources::print_sources(engine.store.as_ref()).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
