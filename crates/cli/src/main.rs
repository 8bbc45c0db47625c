//! docindex
//!
//! Keeps a local semantic index of personal documents in sync with disk.
//!
//! ## Commands
//!
//! - `watch` - Catch up, then index changes live and run scheduled scans (default)
//! - `scan` - One full differential scan with deleted-file detection
//! - `stats` - Manifest and index counters
//! - `search` - Nearest chunks for a natural-language query
//! - `rebuild` - Fresh index from the files the manifest tracks
//! - `config` - Print the effective configuration
//!
//! One-shot commands print a JSON envelope to stdout; logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use docindex_indexer::{HashingEmbedder, IndexerConfig, DEFAULT_CONFIG_FILE, DEFAULT_HASHING_DIMENSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

mod command;

use command::{CommandAction, CommandResponse, ResponseMeta};

#[derive(Parser)]
#[command(name = "docindex", version)]
#[command(about = "Index local documents for semantic search")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Width of the hashing embedder; must match the existing index
    #[arg(long, global = true, default_value_t = DEFAULT_HASHING_DIMENSION)]
    dimension: usize,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index changes live until interrupted
    Watch,
    /// Run one full scan
    Scan,
    /// Show index statistics
    Stats,
    /// Search indexed documents
    Search {
        /// Natural-language query
        query: String,

        /// Number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
    /// Rebuild the vector index from the manifest
    Rebuild,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = IndexerConfig::load(&cli.config);
    let embedder = Arc::new(HashingEmbedder::new(cli.dimension));

    let action = match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => return command::watch(config, embedder).await,
        Commands::Scan => CommandAction::Scan,
        Commands::Stats => CommandAction::Stats,
        Commands::Search { query, top_k } => CommandAction::Search { query, top_k },
        Commands::Rebuild => CommandAction::Rebuild,
        Commands::Config => CommandAction::ConfigRead,
    };

    let started = Instant::now();
    let result = command::execute(action, config, embedder).await;
    let meta = ResponseMeta {
        config_path: Some(cli.config.display().to_string()),
        duration_ms: Some(started.elapsed().as_millis() as u64),
    };
    let response = match result {
        Ok(data) => CommandResponse::ok(data, meta),
        Err(err) => CommandResponse::error(format!("{err:#}"), meta),
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
