pub mod domain;

pub use domain::{CommandResponse, ResponseMeta};

use anyhow::{Context, Result};
use docindex_indexer::{
    ContentReaders, DocumentIndexer, DocumentWatcher, Embedder, FullScanScheduler, IndexerConfig,
    WatcherConfig,
};
use docindex_vector_store::SearchHit;
use log::info;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// One-shot commands that answer with a JSON payload
#[derive(Debug, Clone)]
pub enum CommandAction {
    Scan,
    Stats,
    Search { query: String, top_k: usize },
    Rebuild,
    ConfigRead,
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    query: String,
    hits: Vec<SearchHit>,
}

pub async fn execute(
    action: CommandAction,
    config: IndexerConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Value> {
    let data = match action {
        CommandAction::ConfigRead => serde_json::to_value(&config)?,
        CommandAction::Scan => {
            let indexer = open(config, embedder).await?;
            serde_json::to_value(indexer.run_full_scan().await?)?
        }
        CommandAction::Stats => {
            let indexer = open(config, embedder).await?;
            serde_json::to_value(indexer.stats().await)?
        }
        CommandAction::Search { query, top_k } => {
            let indexer = open(config, embedder).await?;
            let hits = indexer.search(&query, top_k).await?;
            serde_json::to_value(SearchOutput { query, hits })?
        }
        CommandAction::Rebuild => {
            let indexer =
                DocumentIndexer::open_for_rebuild(config, ContentReaders::default(), embedder)
                    .await
                    .context("failed to open data directory")?;
            serde_json::to_value(indexer.rebuild().await?)?
        }
    };
    Ok(data)
}

/// Initial differential pass, then watcher and scheduler until Ctrl-C
pub async fn watch(config: IndexerConfig, embedder: Arc<dyn Embedder>) -> Result<()> {
    let schedule = config.schedule.clone();
    let indexer = open(config, embedder).await?;

    info!("Checking for changes since last run");
    let changed: Vec<PathBuf> = indexer
        .scan_for_changes()
        .await?
        .into_iter()
        .map(|file| file.path)
        .collect();
    if changed.is_empty() {
        info!("Index is up to date");
    } else {
        info!("Indexing {} new or changed files", changed.len());
        let stats = indexer.index_batch(changed).await?;
        info!(
            "Initial pass: {} files, {} chunks",
            stats.files_processed, stats.chunks_added
        );
    }

    let watcher = DocumentWatcher::start(indexer.clone(), WatcherConfig::from(&schedule))?;
    let scheduler = FullScanScheduler::start(indexer.clone(), &schedule);
    info!("Watching for changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    watcher.shutdown().await?;
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}

async fn open(config: IndexerConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<DocumentIndexer>> {
    let indexer = DocumentIndexer::open(config, embedder)
        .await
        .context("failed to open data directory")?;
    Ok(Arc::new(indexer))
}
