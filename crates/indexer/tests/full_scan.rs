use docindex_indexer::{path_key, DocumentIndexer, HashingEmbedder, IndexerConfig, Manifest};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn config_for(docs: &Path, data: &Path) -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.data_dir = data.to_path_buf();
    config.scan.scan_directories = vec![docs.to_path_buf()];
    config.scan.excluded_directories = vec!["**/.git".into(), "**/node_modules".into()];
    config.performance.batch_pause_seconds = 0.0;
    config.performance.batch_size = 2;
    config
}

fn essay(words: usize) -> String {
    let mut text = String::new();
    for i in 0..words {
        text.push_str(&format!("word{i}"));
        text.push_str(if i % 15 == 14 { ". " } else { " " });
    }
    text
}

async fn open(config: &IndexerConfig) -> Arc<DocumentIndexer> {
    let indexer = DocumentIndexer::open(config.clone(), Arc::new(HashingEmbedder::new(64)))
        .await
        .unwrap();
    Arc::new(indexer)
}

#[tokio::test]
async fn full_scan_indexes_then_forgets_deleted_files() {
    let docs = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let config = config_for(docs.path(), data.path());
    let essay_path = docs.path().join("essay.txt");
    std::fs::write(&essay_path, essay(500)).unwrap();

    let indexer = open(&config).await;
    let report = indexer.run_full_scan().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.batch.files_processed, 1);

    let manifest = Manifest::load(config.manifest_path()).await.unwrap();
    let record = manifest.record(&essay_path).unwrap().clone();
    assert!(record.chunk_count >= 1);
    assert_eq!(record.hash.len(), 64);

    let stats = indexer.stats().await;
    assert_eq!(stats.vector_count, stats.total_chunks);
    assert_eq!(stats.total_chunks, record.chunk_count);
    assert!(stats.last_full_scan.is_some());

    std::fs::remove_file(&essay_path).unwrap();
    let report = indexer.run_full_scan().await.unwrap();
    assert_eq!(report.deleted, 1);

    let manifest = Manifest::load(config.manifest_path()).await.unwrap();
    assert!(manifest.record(&essay_path).is_none());
    assert_eq!(indexer.stats().await.vector_count, record.chunk_count);

    // drift is resolved only by an explicit rebuild
    let rebuilt = indexer.rebuild().await.unwrap();
    assert_eq!(rebuilt.vector_count, 0);
}

#[tokio::test]
async fn state_survives_reopen_and_batches_cover_every_file() {
    let docs = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let config = config_for(docs.path(), data.path());
    for i in 0..5 {
        let dir = docs.path().join(format!("folder{i}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.md"), essay(120)).unwrap();
    }
    std::fs::create_dir_all(docs.path().join(".git")).unwrap();
    std::fs::write(docs.path().join(".git/HEAD.txt"), essay(120)).unwrap();

    let indexer = open(&config).await;
    let report = indexer.run_full_scan().await.unwrap();
    assert_eq!(report.batch.files_processed, 5);
    let vectors = indexer.stats().await.vector_count;
    drop(indexer);

    let reopened = open(&config).await;
    let stats = reopened.stats().await;
    assert_eq!(stats.total_files, 5);
    assert_eq!(stats.vector_count, vectors);
    assert!(reopened.scan_for_changes().await.unwrap().is_empty());

    let hits = reopened.search("word3 word4 word5", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|hit| hit.metadata.filename == "notes.md"));
    assert!(!hits
        .iter()
        .any(|hit| hit.metadata.filepath == path_key(&docs.path().join(".git/HEAD.txt"))));
}
