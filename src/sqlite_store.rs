//! SQLite-backed [`VectorStore`].
//!
//! Vectors live as little-endian BLOBs in `chunk_vectors`. Similarity is
//! brute-force cosine over the namespace; adjacency is a raw parameterized
//! range query that excludes the anchor index in SQL.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use ragloop_core::models::{ChunkRecord, RetrievedChunk};
use ragloop_core::store::memory::cosine_similarity;
use ragloop_core::store::{exclusion_key, AdjacentWindow, VectorStore};

use crate::embedding::{blob_to_vec, vec_to_blob};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow, score: Option<f32>) -> RetrievedChunk {
    RetrievedChunk {
        doc_id: row.get("doc_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        title: row.get("title"),
        published: row.get("published"),
        score,
        is_adjacent_chunk: false,
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chunk_vectors WHERE namespace = ?)",
        )
        .bind(namespace)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn namespace_count(&self, namespace: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query_vec: &[f32],
        similarity_threshold: f32,
        top_n: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, chunk_index, text, title, published, embedding
            FROM chunk_vectors
            WHERE namespace = ?
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<RetrievedChunk> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
                if score < similarity_threshold {
                    return None;
                }
                let chunk = row_to_chunk(row, Some(score));
                match chunk.chunk_index {
                    Some(index) if exclude.contains(&exclusion_key(&chunk.doc_id, index)) => None,
                    _ => Some(chunk),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_n);

        Ok(candidates)
    }

    async fn chunk_window(
        &self,
        namespace: &str,
        doc_id: &str,
        window: AdjacentWindow,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, chunk_index, text, title, published
            FROM chunk_vectors
            WHERE namespace = ?1
              AND doc_id = ?2
              AND chunk_index >= ?3
              AND chunk_index <= ?4
              AND chunk_index != ?5
            ORDER BY chunk_index
            "#,
        )
        .bind(namespace)
        .bind(doc_id)
        .bind(window.min)
        .bind(window.max)
        .bind(window.center)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row_to_chunk(row, None)).collect())
    }

    async fn upsert_chunks(
        &self,
        namespace: &str,
        chunks: &[ChunkRecord],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            // Unindexed chunks have no position to replace; they are always appended.
            if let Some(index) = chunk.chunk_index {
                sqlx::query(
                    "DELETE FROM chunk_vectors WHERE namespace = ? AND doc_id = ? AND chunk_index = ?",
                )
                .bind(namespace)
                .bind(&chunk.doc_id)
                .bind(index)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (namespace, doc_id, chunk_index, title, published,
                                           text, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(namespace)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.title)
            .bind(&chunk.published)
            .bind(&chunk.text)
            .bind(chunk.metadata.to_string())
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(chunks.len())
    }
}
