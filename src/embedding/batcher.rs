//! Token-aware batching with rate-limit retry.
//!
//! # Packing
//!
//! Texts are packed in order into [`EmbeddingBatch`]es bounded by both an
//! estimated token total (`ceil(chars / 2)` per text) and an item ceiling.
//! A text that alone exceeds the token ceiling is still sent, in a batch of
//! its own, so the provider rejects it explicitly instead of it vanishing.
//!
//! # Retry
//!
//! Only rate-limit failures are retried, and always for the same batch:
//! - `Retry-After` present: wait exactly that long.
//! - otherwise: `min(max_delay, base_delay * 2^retry)`.
//!
//! After `max_retries` retries the whole operation fails. Any other provider
//! error fails the whole operation immediately. No partial result is
//! ever returned.
//!
//! # Sequencing
//!
//! [`Dispatch::Sequential`] providers run one batch at a time with a delay
//! between batches (none after the last). [`Dispatch::Concurrent`]
//! providers run several batches at once; each result is tagged with its
//! batch index and reassembled in input order.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use super::{Dispatch, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, ProviderError};

/// Characters per token assumed by [`estimate_tokens`]. Deliberately
/// pessimistic for non-English text.
pub const CHARS_PER_TOKEN: usize = 2;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Parse a `Retry-After` header value given in (possibly fractional)
/// seconds. Non-numeric and non-positive values count as absent.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let seconds: f64 = value?.trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0).ceil() as u64))
}

/// A group of texts sent in one provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub texts: Vec<String>,
    pub estimated_tokens: usize,
}

/// Pack `texts` into batches, preserving order.
pub fn pack_batches(texts: &[String], max_tokens: usize, max_items: usize) -> Vec<EmbeddingBatch> {
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut current = EmbeddingBatch {
        texts: Vec::new(),
        estimated_tokens: 0,
    };

    for text in texts {
        let tokens = estimate_tokens(text);

        if tokens > max_tokens {
            if !current.texts.is_empty() {
                batches.push(std::mem::replace(
                    &mut current,
                    EmbeddingBatch {
                        texts: Vec::new(),
                        estimated_tokens: 0,
                    },
                ));
            }
            batches.push(EmbeddingBatch {
                texts: vec![text.clone()],
                estimated_tokens: tokens,
            });
            continue;
        }

        if current.estimated_tokens + tokens > max_tokens && !current.texts.is_empty() {
            batches.push(std::mem::replace(
                &mut current,
                EmbeddingBatch {
                    texts: Vec::new(),
                    estimated_tokens: 0,
                },
            ));
        }
        current.texts.push(text.clone());
        current.estimated_tokens += tokens;

        if current.texts.len() >= max_items {
            batches.push(std::mem::replace(
                &mut current,
                EmbeddingBatch {
                    texts: Vec::new(),
                    estimated_tokens: 0,
                },
            ));
        }
    }

    if !current.texts.is_empty() {
        batches.push(current);
    }
    batches
}

/// Rate-limit retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(delay) = retry_after {
            return delay;
        }
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Size limits for one provider request.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_tokens: usize,
    pub max_items: usize,
}

/// Drives an [`EmbeddingProvider`] with packing, retry, and sequencing.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    limits: BatchLimits,
    retry: RetryPolicy,
    batch_delay: Duration,
}

impl EmbeddingBatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        limits: BatchLimits,
        retry: RetryPolicy,
        batch_delay: Duration,
    ) -> Self {
        Self {
            provider,
            limits,
            retry,
            batch_delay,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(
            provider,
            BatchLimits {
                max_tokens: config.max_tokens_per_request,
                max_items: config.max_items_per_request,
            },
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
            Duration::from_millis(config.batch_delay_ms),
        )
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Embed every text, returning one vector per input in input order.
    pub async fn embed_chunks(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.provider.is_enabled() {
            return Err(EmbeddingError::Disabled);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches = pack_batches(texts, self.limits.max_tokens, self.limits.max_items);
        tracing::info!(
            model = self.provider.model_name(),
            chunks = texts.len(),
            batches = batches.len(),
            "embedding chunks"
        );

        let vectors = match self.provider.dispatch() {
            Dispatch::Sequential => self.run_sequential(&batches).await?,
            Dispatch::Concurrent { max_in_flight } => {
                self.run_concurrent(&batches, max_in_flight).await?
            }
        };

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_chunks(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResponse)
    }

    async fn run_sequential(
        &self,
        batches: &[EmbeddingBatch],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let total = batches.len();
        let mut vectors = Vec::new();
        for (index, batch) in batches.iter().enumerate() {
            vectors.extend(self.run_batch(batch, index, total).await?);
            if index + 1 < total && !self.batch_delay.is_zero() {
                tracing::debug!(delay_ms = self.batch_delay.as_millis() as u64, "delaying next batch");
                tokio::time::sleep(self.batch_delay).await;
            }
        }
        Ok(vectors)
    }

    async fn run_concurrent(
        &self,
        batches: &[EmbeddingBatch],
        max_in_flight: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let total = batches.len();
        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; total];

        let mut pending = Vec::with_capacity(total);
        for (index, batch) in batches.iter().enumerate() {
            pending.push(async move { (index, self.run_batch(batch, index, total).await) });
        }
        let mut results = futures::stream::iter(pending).buffer_unordered(max_in_flight.max(1));

        while let Some((index, result)) = results.next().await {
            slots[index] = Some(result?);
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }

    async fn run_batch(
        &self,
        batch: &EmbeddingBatch,
        index: usize,
        total: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut retry: u32 = 0;
        loop {
            tracing::debug!(
                batch = index + 1,
                total,
                items = batch.texts.len(),
                estimated_tokens = batch.estimated_tokens,
                retry,
                "dispatching embedding batch"
            );

            let err = match self.provider.embed(&batch.texts).await {
                Ok(vectors) if vectors.len() != batch.texts.len() => {
                    tracing::error!(
                        batch = index + 1,
                        total,
                        expected = batch.texts.len(),
                        got = vectors.len(),
                        "embedding batch returned the wrong number of vectors"
                    );
                    return Err(EmbeddingError::CountMismatch {
                        expected: batch.texts.len(),
                        got: vectors.len(),
                    });
                }
                Ok(vectors) => return Ok(vectors),
                Err(err) => err,
            };

            let retry_after = match &err {
                ProviderError::RateLimited { retry_after, .. } => *retry_after,
                ProviderError::Request { .. } => {
                    tracing::error!(batch = index + 1, total, error = %err, "embedding batch failed");
                    return Err(EmbeddingError::BatchFailed {
                        batch: index + 1,
                        total,
                        source: err,
                    });
                }
            };

            if retry >= self.retry.max_retries {
                tracing::error!(
                    batch = index + 1,
                    total,
                    retries = retry,
                    error = %err,
                    "embedding batch still rate limited; giving up"
                );
                return Err(EmbeddingError::RetriesExhausted {
                    batch: index + 1,
                    total,
                    attempts: retry + 1,
                    source: err,
                });
            }

            let delay = self.retry.delay_for(retry, retry_after);
            let delay_source = if retry_after.is_some() {
                "retry-after"
            } else {
                "backoff"
            };
            tracing::warn!(
                batch = index + 1,
                total,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                from = delay_source,
                "rate limited; retrying embedding batch"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
