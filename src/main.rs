//! # docsearch CLI
//!
//! ## Usage
//!
//! ```bash
//! docsearch --config ./config/docsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsearch init` | Create the SQLite schema |
//! | `docsearch sync` | Index the docs tree into the store |
//! | `docsearch sync --dry-run` | Show what a sync would do |
//! | `docsearch status` | List stored pages, flagging pending ones |
//! | `docsearch search "<query>"` | Stream the best-matching sections |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr so
//! command output on stdout stays clean.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docsearch::{config, migrate, search, status, sync};

/// Incremental Markdown/MDX indexer with a section-level embedding store.
#[derive(Parser)]
#[command(
    name = "docsearch",
    about = "Index a Markdown/MDX docs tree into an embedding store and query it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docsearch.toml`. Credentials may also come from
    /// DOCSEARCH_STORE_URL, DOCSEARCH_STORE_KEY and OPENAI_KEY.
    #[arg(long, global = true, default_value = "./config/docsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite schema.
    ///
    /// Idempotent. PostgREST schemas are provisioned outside this tool.
    Init,

    /// Sync the docs tree into the store.
    ///
    /// Unchanged documents are skipped by checksum; changed and previously
    /// failed documents are regenerated in full. Skips with a diagnostic
    /// when credentials are missing.
    Sync {
        /// Classify documents without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Query indexed sections by semantic similarity.
    Search {
        /// Free-text query.
        query: String,
    },

    /// List stored pages and the ones awaiting regeneration.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { dry_run } => {
            sync::run_sync(&cfg, dry_run).await?;
        }
        Commands::Search { query } => {
            search::run_search(&cfg, &query).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
