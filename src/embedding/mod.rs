//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: OpenAI-compatible `/embeddings` endpoint. Strict
//!   per-minute quota, so batches run one at a time.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed`. No quota,
//!   so batches may run concurrently.
//!
//! Providers make exactly one HTTP call per [`EmbeddingProvider::embed`]
//! and classify failures as [`ProviderError`]. Packing, retry, and
//! sequencing live in [`batcher`].
//!
//! Also provides BLOB helpers for storing vectors in SQLite:
//! - [`vec_to_blob`] encodes a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] decodes it back
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use ragloop::config::EmbeddingConfig;
//! # use ragloop::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

pub mod batcher;
mod ollama;
mod openai;

pub use batcher::{EmbeddingBatcher, RetryPolicy};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

/// How the batcher may schedule a provider's batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One batch at a time with an inter-batch delay.
    Sequential,
    /// Up to `max_in_flight` batches at once; results are re-ordered by index.
    Concurrent { max_in_flight: usize },
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    fn dispatch(&self) -> Dispatch;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Embed one batch with a single request. Vectors come back in input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always fails.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Sequential
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Request {
            status: None,
            message: "embedding provider is disabled".to_string(),
        })
    }
}

/// Instantiate the configured provider.
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider
/// cannot be initialized (missing model or API key).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Pull float vectors out of a JSON array of arrays.
fn parse_vectors(items: &[serde_json::Value]) -> Option<Vec<Vec<f32>>> {
    items
        .iter()
        .map(|item| {
            item.as_array().map(|values| {
                values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect()
            })
        })
        .collect()
}
