//! Error types for the application crate.
//!
//! Typed errors at the provider seams so callers can tell a rate limit from
//! a hard failure; `anyhow` everywhere else.

use std::time::Duration;

/// Errors from the chat completion provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    Request { message: String },

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("environment variable {var} not set")]
    MissingApiKey { var: String },
}

/// A single embedding request failure, classified for the batcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429 or a provider-specific rate-limit marker.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("request failed: {message}")]
    Request {
        status: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Whole-operation embedding failures. No partial result accompanies these.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding batch {batch} of {total} failed: {source}")]
    BatchFailed {
        batch: usize,
        total: usize,
        source: ProviderError,
    },

    #[error("embedding batch {batch} of {total} still rate limited after {attempts} attempts: {source}")]
    RetriesExhausted {
        batch: usize,
        total: usize,
        attempts: u32,
        source: ProviderError,
    },

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("provider returned no vector for the query")]
    EmptyResponse,
}

/// Turn-fatal failures inside the reasoning loop.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("LLM returned an empty response during ReAct reasoning.")]
    EmptyCompletion,

    #[error(transparent)]
    Llm(#[from] LlmError),
}
