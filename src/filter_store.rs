//! Vector backends that reach a remote index through metadata filters.
//!
//! Remote vector engines disagree on how to ask "give me chunks 3..=7 of
//! document X except 5". Two dialects are supported:
//!
//! | Dialect | Adjacency request |
//! |---------|-------------------|
//! | [`FilterDialect::Operators`] | similarity query with a zero vector and `{docId:{$eq}, chunkIndex:{$gte,$lte,$ne}}` |
//! | [`FilterDialect::RangeOnly`] | filter-only fetch with `{docId, chunkIndex:{$gte,$lte}}`; the anchor is removed client-side |
//!
//! The transport sits behind [`FilterIndex`] so the dialect logic can be
//! exercised without a server. [`HttpFilterIndex`] is the JSON-over-HTTP
//! client used in production.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use ragloop_core::models::{ChunkRecord, RetrievedChunk};
use ragloop_core::store::{exclusion_key, AdjacentWindow, VectorStore};

use crate::config::RetrievalConfig;

/// One record returned by a [`FilterIndex`].
#[derive(Debug, Clone, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: Value,
}

/// One record written to a [`FilterIndex`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexPoint {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

/// Minimal remote index client.
#[async_trait]
pub trait FilterIndex: Send + Sync {
    /// Similarity query, optionally narrowed by a metadata filter.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<IndexMatch>>;

    /// Filter-only lookup with no ranking.
    async fn fetch(&self, namespace: &str, filter: &Value, limit: usize) -> Result<Vec<IndexMatch>>;

    async fn upsert(&self, namespace: &str, points: &[IndexPoint]) -> Result<usize>;

    /// Number of records in the namespace, `None` if it does not exist.
    async fn count(&self, namespace: &str) -> Result<Option<usize>>;
}

/// How a backend expresses an adjacency window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDialect {
    Operators,
    RangeOnly,
}

impl FilterDialect {
    pub fn window_filter(&self, doc_id: &str, window: &AdjacentWindow) -> Value {
        match self {
            FilterDialect::Operators => json!({
                "docId": { "$eq": doc_id },
                "chunkIndex": {
                    "$gte": window.min,
                    "$lte": window.max,
                    "$ne": window.center,
                },
            }),
            FilterDialect::RangeOnly => json!({
                "docId": doc_id,
                "chunkIndex": { "$gte": window.min, "$lte": window.max },
            }),
        }
    }
}

/// [`VectorStore`] over a [`FilterIndex`] in a given [`FilterDialect`].
pub struct FilterStore<I: FilterIndex> {
    index: I,
    dialect: FilterDialect,
    /// Index dimension, needed for the zero query vector of the operator dialect.
    dims: Option<usize>,
}

impl<I: FilterIndex> FilterStore<I> {
    pub fn new(index: I, dialect: FilterDialect, dims: Option<usize>) -> Self {
        Self {
            index,
            dialect,
            dims,
        }
    }
}

fn match_to_chunk(m: IndexMatch) -> RetrievedChunk {
    let meta = &m.metadata;
    let text_of = |key: &str| {
        meta.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let doc_id = meta
        .get("docId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| m.id.clone());

    RetrievedChunk {
        doc_id,
        chunk_index: meta.get("chunkIndex").and_then(|v| v.as_i64()),
        text: text_of("text"),
        title: text_of("title"),
        published: text_of("published"),
        score: m.score,
        is_adjacent_chunk: false,
    }
}

#[async_trait]
impl<I: FilterIndex> VectorStore for FilterStore<I> {
    fn backend_name(&self) -> &'static str {
        match self.dialect {
            FilterDialect::Operators => "operator_filter",
            FilterDialect::RangeOnly => "range_filter",
        }
    }

    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.index.count(namespace).await?.is_some())
    }

    async fn namespace_count(&self, namespace: &str) -> Result<usize> {
        Ok(self.index.count(namespace).await?.unwrap_or(0))
    }

    async fn similarity_search(
        &self,
        namespace: &str,
        query_vec: &[f32],
        similarity_threshold: f32,
        top_n: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<RetrievedChunk>> {
        // Over-fetch so client-side exclusion can still fill top_n.
        let matches = self
            .index
            .query(namespace, query_vec, top_n + exclude.len(), None)
            .await?;

        let mut chunks: Vec<RetrievedChunk> = matches
            .into_iter()
            .map(match_to_chunk)
            .filter(|c| c.score.unwrap_or(0.0) >= similarity_threshold)
            .filter(|c| {
                c.chunk_index
                    .map(|i| !exclude.contains(&exclusion_key(&c.doc_id, i)))
                    .unwrap_or(true)
            })
            .collect();
        chunks.truncate(top_n);
        Ok(chunks)
    }

    async fn chunk_window(
        &self,
        namespace: &str,
        doc_id: &str,
        window: AdjacentWindow,
    ) -> Result<Vec<RetrievedChunk>> {
        let filter = self.dialect.window_filter(doc_id, &window);
        let limit = (window.max - window.min + 1).max(0) as usize;

        let matches = match self.dialect {
            FilterDialect::Operators => {
                let Some(dims) = self.dims else {
                    tracing::warn!(
                        backend = self.backend_name(),
                        "index dimension unknown; skipping adjacent chunk lookup"
                    );
                    return Ok(Vec::new());
                };
                let zero = vec![0.0f32; dims];
                self.index
                    .query(namespace, &zero, limit, Some(&filter))
                    .await?
            }
            FilterDialect::RangeOnly => self.index.fetch(namespace, &filter, limit).await?,
        };

        Ok(matches
            .into_iter()
            .map(match_to_chunk)
            .filter(|c| c.chunk_index != Some(window.center))
            .map(|mut c| {
                c.score = None;
                c
            })
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

        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| IndexPoint {
                id: match chunk.chunk_index {
                    Some(i) => exclusion_key(&chunk.doc_id, i),
                    None => uuid::Uuid::new_v4().to_string(),
                },
                values: vector.clone(),
                metadata: json!({
                    "docId": chunk.doc_id,
                    "chunkIndex": chunk.chunk_index,
                    "text": chunk.text,
                    "title": chunk.title,
                    "published": chunk.published,
                }),
            })
            .collect();

        self.index.upsert(namespace, &points).await
    }
}

// ============ HTTP client ============

/// JSON-over-HTTP [`FilterIndex`].
///
/// Endpoints, relative to `retrieval.url`:
/// - `POST /namespaces/{ns}/query` `{vector, topK, filter?}` → `{matches}`
/// - `POST /namespaces/{ns}/fetch` `{filter, limit}` → `{matches}`
/// - `POST /namespaces/{ns}/upsert` `{points}` → `{upserted}`
/// - `GET /namespaces/{ns}/stats` → `{count}`, 404 when absent
pub struct HttpFilterIndex {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MatchesResponse {
    #[serde(default)]
    matches: Vec<IndexMatch>,
}

impl HttpFilterIndex {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("retrieval.url required for filter backends"))?;
        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self, namespace: &str, op: &str) -> String {
        format!("{}/namespaces/{}/{}", self.url, namespace, op)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Api-Key", key),
            None => req,
        }
    }

    async fn post(&self, namespace: &str, op: &str, body: Value) -> Result<Value> {
        let response = self
            .authed(self.client.post(self.endpoint(namespace, op)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("vector index {} request failed", op))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("vector index {} returned {}: {}", op, status, text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FilterIndex for HttpFilterIndex {
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<IndexMatch>> {
        let mut body = json!({ "vector": vector, "topK": top_k });
        if let Some(filter) = filter {
            body["filter"] = filter.clone();
        }
        let json = self.post(namespace, "query", body).await?;
        Ok(serde_json::from_value::<MatchesResponse>(json)?.matches)
    }

    async fn fetch(&self, namespace: &str, filter: &Value, limit: usize) -> Result<Vec<IndexMatch>> {
        let body = json!({ "filter": filter, "limit": limit });
        let json = self.post(namespace, "fetch", body).await?;
        Ok(serde_json::from_value::<MatchesResponse>(json)?.matches)
    }

    async fn upsert(&self, namespace: &str, points: &[IndexPoint]) -> Result<usize> {
        let json = self
            .post(namespace, "upsert", json!({ "points": points }))
            .await?;
        Ok(json
            .get("upserted")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(points.len()))
    }

    async fn count(&self, namespace: &str) -> Result<Option<usize>> {
        let response = self
            .authed(self.client.get(self.endpoint(namespace, "stats")))
            .send()
            .await
            .context("vector index stats request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("vector index stats returned {}", response.status());
        }
        let json: Value = response.json().await?;
        Ok(Some(
            json.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        ))
    }
}
