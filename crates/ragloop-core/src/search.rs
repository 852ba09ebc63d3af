//! Similarity search with adjacent-chunk stitching.
//!
//! The search algorithm operates entirely through the [`VectorStore`]
//! trait. The calling application embeds the query text and passes the
//! precomputed vector along with a [`SearchRequest`].
//!
//! # Algorithm
//!
//! 1. Fetch the top `top_n` matches at or above `similarity_threshold`.
//! 2. Claim the `docId-chunkIndex` key of every top match.
//! 3. Walk the matches in rank order. After each match, if `adjacent_chunks`
//!    is non-zero and the match carries an index, fetch its neighbours with
//!    every claimed key excluded.
//! 4. Neighbours claim their own keys as they are added, so a chunk adjacent
//!    to two matches appears once, at its first position.
//!
//! Engine failures never propagate: they come back as
//! [`SearchResponse::error_message`] with empty results.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::RetrievedChunk;
use crate::store::{get_adjacent_chunks, VectorStore};

/// Inputs for a single retrieval call.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Vector namespace, one per workspace.
    pub namespace: &'a str,
    pub similarity_threshold: f32,
    pub top_n: usize,
    /// Neighbour radius on each side of a match. `0` disables stitching.
    pub adjacent_chunks: u32,
    /// Extra `docId-chunkIndex` keys the caller wants left out.
    pub exclude: HashSet<String>,
}

/// Retrieval result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub context_texts: Vec<String>,
    pub sources: Vec<RetrievedChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SearchResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            context_texts: Vec::new(),
            sources: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    fn push(&mut self, chunk: RetrievedChunk) {
        self.context_texts.push(chunk.text.clone());
        self.sources.push(chunk);
    }
}

/// Run a similarity search and stitch in adjacent chunks.
pub async fn perform_similarity_search(
    store: &dyn VectorStore,
    query_vec: &[f32],
    req: &SearchRequest<'_>,
) -> SearchResponse {
    let matches = match store
        .similarity_search(
            req.namespace,
            query_vec,
            req.similarity_threshold,
            req.top_n,
            &req.exclude,
        )
        .await
    {
        Ok(matches) => matches,
        Err(e) => {
            tracing::error!(
                backend = store.backend_name(),
                namespace = req.namespace,
                error = %e,
                "similarity search failed"
            );
            return SearchResponse::failed(e.to_string());
        }
    };

    let mut claimed: HashSet<String> = req.exclude.clone();
    claimed.extend(matches.iter().filter_map(|m| m.exclusion_key()));

    let mut emitted: HashSet<String> = HashSet::new();
    let mut response = SearchResponse::default();

    for top in matches {
        let key = top.exclusion_key();
        if let Some(key) = &key {
            if !emitted.insert(key.clone()) {
                continue;
            }
        }

        let stitch = req.adjacent_chunks > 0 && key.is_some();
        let anchor = top.clone();
        response.push(top);

        if !stitch {
            continue;
        }

        let neighbours =
            get_adjacent_chunks(store, req.namespace, &anchor, req.adjacent_chunks, &claimed).await;
        for neighbour in neighbours {
            let Some(key) = neighbour.exclusion_key() else {
                continue;
            };
            if claimed.insert(key.clone()) {
                emitted.insert(key);
                response.push(neighbour);
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkRecord;
    use crate::store::memory::InMemoryStore;
    use crate::store::AdjacentWindow;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(doc: &str, index: Option<i64>) -> ChunkRecord {
        ChunkRecord {
            doc_id: doc.to_string(),
            chunk_index: index,
            text: format!("{}:{}", doc, index.map(|i| i.to_string()).unwrap_or_default()),
            title: format!("{} title", doc),
            published: "2024-01-01".to_string(),
            metadata: serde_json::json!({}),
        }
    }

    /// Wraps the in-memory store and counts window lookups.
    struct CountingStore {
        inner: InMemoryStore,
        window_calls: AtomicUsize,
        fail_search: bool,
        fail_window: bool,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                window_calls: AtomicUsize::new(0),
                fail_search: false,
                fail_window: false,
            }
        }
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        fn backend_name(&self) -> &'static str {
            "counting"
        }
        async fn has_namespace(&self, namespace: &str) -> Result<bool> {
            self.inner.has_namespace(namespace).await
        }
        async fn namespace_count(&self, namespace: &str) -> Result<usize> {
            self.inner.namespace_count(namespace).await
        }
        async fn similarity_search(
            &self,
            namespace: &str,
            query_vec: &[f32],
            similarity_threshold: f32,
            top_n: usize,
            exclude: &HashSet<String>,
        ) -> Result<Vec<RetrievedChunk>> {
            if self.fail_search {
                bail!("connection refused");
            }
            self.inner
                .similarity_search(namespace, query_vec, similarity_threshold, top_n, exclude)
                .await
        }
        async fn chunk_window(
            &self,
            namespace: &str,
            doc_id: &str,
            window: AdjacentWindow,
        ) -> Result<Vec<RetrievedChunk>> {
            self.window_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_window {
                bail!("filter rejected");
            }
            self.inner.chunk_window(namespace, doc_id, window).await
        }
        async fn upsert_chunks(
            &self,
            namespace: &str,
            chunks: &[ChunkRecord],
            vectors: &[Vec<f32>],
        ) -> Result<usize> {
            self.inner.upsert_chunks(namespace, chunks, vectors).await
        }
    }

    fn request(adjacent: u32, top_n: usize) -> SearchRequest<'static> {
        SearchRequest {
            namespace: "ws",
            similarity_threshold: 0.5,
            top_n,
            adjacent_chunks: adjacent,
            exclude: HashSet::new(),
        }
    }

    /// doc-123 has chunks 0..=4; chunks 1 and 2 match the query, others do not.
    async fn seeded() -> CountingStore {
        let store = CountingStore::new();
        let chunks: Vec<ChunkRecord> = (0..5).map(|i| record("doc-123", Some(i))).collect();
        let vectors = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ];
        store.upsert_chunks("ws", &chunks, &vectors).await.unwrap();
        store
    }

    fn indexes(resp: &SearchResponse) -> Vec<(i64, bool)> {
        resp.sources
            .iter()
            .map(|s| (s.chunk_index.unwrap(), s.is_adjacent_chunk))
            .collect()
    }

    #[tokio::test]
    async fn test_no_adjacency_returns_top_matches() {
        let store = seeded().await;
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(0, 4)).await;
        assert_eq!(indexes(&resp), vec![(1, false), (2, false)]);
        assert_eq!(resp.context_texts, vec!["doc-123:1", "doc-123:2"]);
        assert_eq!(store.window_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_adjacent_chunks_deduplicated_across_matches() {
        let store = seeded().await;
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(1, 4)).await;
        // 1 stitches 0 (2 is claimed by a top match); 2 stitches 3 (1 is claimed).
        assert_eq!(
            indexes(&resp),
            vec![(1, false), (0, true), (2, false), (3, true)]
        );
        assert_eq!(store.window_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wide_radius_never_repeats_a_chunk() {
        let store = seeded().await;
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(5, 4)).await;
        assert_eq!(resp.sources.len(), 5);
        let keys: HashSet<String> = resp.sources.iter().filter_map(|s| s.exclusion_key()).collect();
        assert_eq!(keys.len(), 5);
    }

    #[tokio::test]
    async fn test_legacy_match_skips_adjacency() {
        let store = CountingStore::new();
        store
            .upsert_chunks("ws", &[record("old", None)], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(2, 4)).await;
        assert_eq!(resp.sources.len(), 1);
        assert_eq!(store.window_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_chunk_has_no_negative_neighbours() {
        let store = CountingStore::new();
        let chunks: Vec<ChunkRecord> = (0..3).map(|i| record("d", Some(i))).collect();
        store
            .upsert_chunks("ws", &chunks, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(1, 1)).await;
        assert_eq!(indexes(&resp), vec![(0, false), (1, true)]);
    }

    #[tokio::test]
    async fn test_search_error_becomes_message() {
        let mut store = CountingStore::new();
        store.fail_search = true;
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(1, 4)).await;
        assert_eq!(resp.error_message.as_deref(), Some("connection refused"));
        assert!(resp.sources.is_empty());
        assert!(resp.context_texts.is_empty());
    }

    #[tokio::test]
    async fn test_window_error_keeps_top_matches() {
        let mut store = seeded().await;
        store.fail_window = true;
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &request(1, 4)).await;
        assert!(resp.error_message.is_none());
        assert_eq!(indexes(&resp), vec![(1, false), (2, false)]);
    }

    #[tokio::test]
    async fn test_caller_exclusions_apply() {
        let store = seeded().await;
        let mut req = request(1, 4);
        req.exclude.insert("doc-123-0".to_string());
        let resp = perform_similarity_search(&store, &[1.0, 0.0], &req).await;
        assert_eq!(indexes(&resp), vec![(1, false), (2, false), (3, true)]);
    }
}
