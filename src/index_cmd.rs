use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use ragloop_core::models::ChunkRecord;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingBatcher};
use crate::migrate;
use crate::retrieval;

/// Read pre-chunked JSONL records, one [`ChunkRecord`] per line.
///
/// Blank lines are skipped. A malformed line fails the whole file.
pub fn read_chunk_file(path: &Path) -> Result<Vec<ChunkRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file: {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<ChunkRecord>(line)
                .with_context(|| format!("{}:{}: invalid chunk record", path.display(), n + 1))
        })
        .collect()
}

/// Embed the records of `path` and write them into the workspace namespace.
pub async fn run_index(config: &Config, path: &Path, workspace: &str, dry_run: bool) -> Result<()> {
    if config.workspace(workspace).is_none() {
        bail!("Unknown workspace: '{}'", workspace);
    }
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let records = read_chunk_file(path)?;

    if dry_run {
        println!("index (dry-run)");
        println!("  workspace: {}", workspace);
        println!("  records: {}", records.len());
        return Ok(());
    }
    if records.is_empty() {
        println!("index");
        println!("  nothing to index");
        return Ok(());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let batcher = EmbeddingBatcher::from_config(Arc::clone(&provider), &config.embedding);
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = retrieval::create_store(config, &pool)?;
    if store.backend_name() == "memory" {
        tracing::warn!("retrieval backend is 'memory'; indexed vectors are lost on exit");
    }

    let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
    let vectors = batcher.embed_chunks(&texts).await?;
    let written = store.upsert_chunks(workspace, &records, &vectors).await?;

    println!("index");
    println!("  workspace: {}", workspace);
    println!("  backend: {}", store.backend_name());
    println!("  model: {}", provider.model_name());
    println!("  records: {}", records.len());
    println!("  written: {}", written);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_chunk_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"docId": "d1", "chunkIndex": 0, "title": "Guide", "published": "2024", "text": "first"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"docId": "d1", "text": "legacy"}}"#).unwrap();

        let records = read_chunk_file(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chunk_index, Some(0));
        assert_eq!(records[1].chunk_index, None);
        assert_eq!(records[1].title, "");
    }

    #[test]
    fn test_bad_line_reports_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"docId": "d1", "text": "ok"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let err = read_chunk_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(":2: invalid chunk record"));
    }
}
