//! Document retrieval for the reasoning loop.
//!
//! [`Retriever`] embeds the query through the [`EmbeddingBatcher`] and runs
//! [`perform_similarity_search`] against whichever [`VectorStore`] the
//! configuration selected. The loop only sees the [`DocumentSearch`] trait,
//! so tests can script retrieval without vectors or a database.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

use ragloop_core::search::{perform_similarity_search, SearchRequest, SearchResponse};
use ragloop_core::store::memory::InMemoryStore;
use ragloop_core::store::VectorStore;

use crate::config::{Config, WorkspaceConfig, MAX_ADJACENT_CHUNKS};
use crate::embedding::EmbeddingBatcher;
use crate::filter_store::{FilterDialect, FilterStore, HttpFilterIndex};
use crate::sqlite_store::SqliteVectorStore;

/// Search capability consumed by the reasoning loop.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// `false` when the namespace is missing or empty. Lookup errors count
    /// as "no content".
    async fn has_vectorized_content(&self, namespace: &str) -> bool;

    /// Never fails: engine and embedding errors come back in
    /// [`SearchResponse::error_message`].
    async fn search(&self, namespace: &str, query: &str, settings: &WorkspaceConfig)
        -> SearchResponse;
}

pub struct Retriever {
    batcher: Arc<EmbeddingBatcher>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(batcher: Arc<EmbeddingBatcher>, store: Arc<dyn VectorStore>) -> Self {
        Self { batcher, store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }
}

#[async_trait]
impl DocumentSearch for Retriever {
    async fn has_vectorized_content(&self, namespace: &str) -> bool {
        let present = match self.store.has_namespace(namespace).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(namespace, error = %e, "namespace lookup failed");
                return false;
            }
        };
        if !present {
            return false;
        }
        match self.store.namespace_count(namespace).await {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::warn!(namespace, error = %e, "namespace count failed");
                false
            }
        }
    }

    async fn search(
        &self,
        namespace: &str,
        query: &str,
        settings: &WorkspaceConfig,
    ) -> SearchResponse {
        let query_vec = match self.batcher.embed_query(query).await {
            Ok(vec) => vec,
            Err(e) => {
                tracing::error!(namespace, error = %e, "query embedding failed");
                return SearchResponse::failed(e.to_string());
            }
        };

        let req = SearchRequest {
            namespace,
            similarity_threshold: settings.similarity_threshold,
            top_n: settings.top_n,
            adjacent_chunks: settings.adjacent_chunks.min(MAX_ADJACENT_CHUNKS),
            exclude: HashSet::new(),
        };
        let response = perform_similarity_search(self.store.as_ref(), &query_vec, &req).await;
        tracing::debug!(
            namespace,
            backend = self.store.backend_name(),
            sources = response.sources.len(),
            "retrieval finished"
        );
        response
    }
}

/// Build the vector backend named by `retrieval.backend`.
pub fn create_store(config: &Config, pool: &SqlitePool) -> Result<Arc<dyn VectorStore>> {
    let retrieval = &config.retrieval;
    match retrieval.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteVectorStore::new(pool.clone()))),
        "operator_filter" => Ok(Arc::new(FilterStore::new(
            HttpFilterIndex::new(retrieval)?,
            FilterDialect::Operators,
            retrieval.dims,
        ))),
        "range_filter" => Ok(Arc::new(FilterStore::new(
            HttpFilterIndex::new(retrieval)?,
            FilterDialect::RangeOnly,
            retrieval.dims,
        ))),
        other => anyhow::bail!("Unknown retrieval backend: {}", other),
    }
}
