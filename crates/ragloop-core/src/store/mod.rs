//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the boundary every retrieval backend
//! implements. Backends differ in how they express an adjacency lookup
//! (range filter, inclusion/exclusion operators, raw parameterized SQL), but
//! they all answer the same two questions: "what is similar to this vector"
//! and "which chunks of this document sit inside this index window".
//!
//! Exclusion of already-claimed chunks, error swallowing, and the legacy
//! no-index carve-out are handled once in [`get_adjacent_chunks`], not per
//! backend.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkRecord, RetrievedChunk};

/// Build the `docId-chunkIndex` key used for adjacency exclusion.
pub fn exclusion_key(doc_id: &str, chunk_index: i64) -> String {
    format!("{}-{}", doc_id, chunk_index)
}

/// Inclusive chunk-index window around a matched chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacentWindow {
    /// Index of the matched chunk itself; never part of the result.
    pub center: i64,
    /// `max(0, center - radius)`.
    pub min: i64,
    /// `center + radius`.
    pub max: i64,
}

impl AdjacentWindow {
    pub fn around(center: i64, radius: u32) -> Self {
        let radius = i64::from(radius);
        Self {
            center,
            min: center.saturating_sub(radius).max(0),
            max: center.saturating_add(radius),
        }
    }

    pub fn contains(&self, index: i64) -> bool {
        index >= self.min && index <= self.max && index != self.center
    }
}

/// Abstract vector backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`has_namespace`](VectorStore::has_namespace) | Whether the namespace exists at all |
/// | [`namespace_count`](VectorStore::namespace_count) | Number of vectors stored in the namespace |
/// | [`similarity_search`](VectorStore::similarity_search) | Top-N chunks above a similarity threshold |
/// | [`chunk_window`](VectorStore::chunk_window) | Chunks of one document inside an index window |
/// | [`upsert_chunks`](VectorStore::upsert_chunks) | Store chunk vectors |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str;

    async fn has_namespace(&self, namespace: &str) -> Result<bool>;

    async fn namespace_count(&self, namespace: &str) -> Result<usize>;

    /// Return up to `top_n` chunks scoring at least `similarity_threshold`,
    /// best first, skipping any whose `docId-chunkIndex` key is in `exclude`.
    async fn similarity_search(
        &self,
        namespace: &str,
        query_vec: &[f32],
        similarity_threshold: f32,
        top_n: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Return chunks of `doc_id` whose index lies in `window`.
    ///
    /// Backends may or may not drop `window.center` natively; the caller
    /// removes it either way.
    async fn chunk_window(
        &self,
        namespace: &str,
        doc_id: &str,
        window: AdjacentWindow,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Insert or replace chunk vectors, returning the number written.
    async fn upsert_chunks(
        &self,
        namespace: &str,
        chunks: &[ChunkRecord],
        vectors: &[Vec<f32>],
    ) -> Result<usize>;
}

/// Fetch the neighbours of `anchor` within `radius` positions.
///
/// - A zero radius or an anchor without `chunk_index` returns empty without
///   touching the backend.
/// - The anchor's own index and any key in `exclude` are removed.
/// - Backend errors are logged and produce an empty result.
///
/// Results are flagged `is_adjacent_chunk` and ordered by index.
pub async fn get_adjacent_chunks(
    store: &dyn VectorStore,
    namespace: &str,
    anchor: &RetrievedChunk,
    radius: u32,
    exclude: &HashSet<String>,
) -> Vec<RetrievedChunk> {
    let Some(center) = anchor.chunk_index else {
        return Vec::new();
    };
    if radius == 0 {
        return Vec::new();
    }

    let window = AdjacentWindow::around(center, radius);
    let rows = match store.chunk_window(namespace, &anchor.doc_id, window).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(
                backend = store.backend_name(),
                doc_id = %anchor.doc_id,
                chunk_index = center,
                error = %e,
                "adjacent chunk lookup failed"
            );
            return Vec::new();
        }
    };

    let mut neighbours: Vec<RetrievedChunk> = rows
        .into_iter()
        .filter(|c| c.doc_id == anchor.doc_id)
        .filter(|c| c.chunk_index.is_some_and(|i| window.contains(i)))
        .filter(|c| {
            c.exclusion_key()
                .map(|key| !exclude.contains(&key))
                .unwrap_or(false)
        })
        .map(|mut c| {
            c.is_adjacent_chunk = true;
            c.score = None;
            c
        })
        .collect();
    neighbours.sort_by_key(|c| c.chunk_index);
    neighbours
}
