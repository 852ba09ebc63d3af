//! In-memory [`VectorStore`] implementation for tests and demos.
//!
//! Uses a `HashMap` of namespaces behind `std::sync::RwLock`. Similarity
//! search is brute-force cosine over every stored vector; adjacency is a
//! plain range filter over stored rows.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{ChunkRecord, RetrievedChunk};

use super::{AdjacentWindow, VectorStore};

struct StoredVector {
    chunk: ChunkRecord,
    vector: Vec<f32>,
}

/// In-memory vector store.
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<String, Vec<StoredVector>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn to_retrieved(chunk: &ChunkRecord, score: Option<f32>) -> RetrievedChunk {
    RetrievedChunk {
        doc_id: chunk.doc_id.clone(),
        chunk_index: chunk.chunk_index,
        text: chunk.text.clone(),
        title: chunk.title.clone(),
        published: chunk.published.clone(),
        score,
        is_adjacent_chunk: false,
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        let namespaces = self.namespaces.read().unwrap();
        Ok(namespaces.contains_key(namespace))
    }

    async fn namespace_count(&self, namespace: &str) -> Result<usize> {
        let namespaces = self.namespaces.read().unwrap();
        Ok(namespaces.get(namespace).map(|rows| rows.len()).unwrap_or(0))
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query_vec: &[f32],
        similarity_threshold: f32,
        top_n: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<RetrievedChunk>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(rows) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &StoredVector)> = rows
            .iter()
            .map(|row| (cosine_similarity(query_vec, &row.vector), row))
            .filter(|(score, _)| *score >= similarity_threshold)
            .filter(|(_, row)| {
                row.chunk
                    .chunk_index
                    .map(|i| !exclude.contains(&super::exclusion_key(&row.chunk.doc_id, i)))
                    .unwrap_or(true)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);

        Ok(scored
            .into_iter()
            .map(|(score, row)| to_retrieved(&row.chunk, Some(score)))
            .collect())
    }

    async fn chunk_window(
        &self,
        namespace: &str,
        doc_id: &str,
        window: AdjacentWindow,
    ) -> Result<Vec<RetrievedChunk>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(rows) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| row.chunk.doc_id == doc_id)
            .filter(|row| {
                row.chunk
                    .chunk_index
                    .is_some_and(|i| i >= window.min && i <= window.max)
            })
            .map(|row| to_retrieved(&row.chunk, None))
            .collect())
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
        let mut namespaces = self.namespaces.write().unwrap();
        let rows = namespaces.entry(namespace.to_string()).or_default();
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            if let Some(index) = chunk.chunk_index {
                rows.retain(|row| {
                    !(row.chunk.doc_id == chunk.doc_id && row.chunk.chunk_index == Some(index))
                });
            }
            rows.push(StoredVector {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
        }
        Ok(chunks.len())
    }
}
