//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`]. Every section except `[db]`
//! has defaults; see `config/rloop.example.toml` for a full example.

use anyhow::{Context, Result};
use ragloop_core::compress::{CompressionConfig, CompressionPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Floor applied to the inter-batch delay of sequential embedding providers.
pub const MIN_BATCH_DELAY_MS: u64 = 500;

/// Upper bound on the adjacent-chunk radius a workspace may request.
pub const MAX_ADJACENT_CHUNKS: u32 = 5;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub react: ReactConfig,
    #[serde(default)]
    pub compression: CompressionSection,
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_openai_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            default_temperature: default_temperature(),
            context_window: default_context_window(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_context_window() -> usize {
    8192
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_tokens_per_request")]
    pub max_tokens_per_request: usize,
    #[serde(default = "default_max_items_per_request")]
    pub max_items_per_request: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            max_tokens_per_request: default_max_tokens_per_request(),
            max_items_per_request: default_max_items_per_request(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    60_000
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_max_tokens_per_request() -> usize {
    150_000
}
fn default_max_items_per_request() -> usize {
    500
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Vector dimension of the remote index; the operator-filter backend
    /// needs it to build its zero query vector.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            api_key_env: None,
            dims: None,
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_retrieval_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReactConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_observation_max_chars")]
    pub observation_max_chars: usize,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            observation_max_chars: default_observation_max_chars(),
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}
fn default_observation_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompressionSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub policy: CompressionPolicy,
    #[serde(default = "default_token_buffer")]
    pub token_buffer: usize,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: CompressionPolicy::default(),
            token_buffer: default_token_buffer(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_token_buffer() -> usize {
    600
}

/// Per-workspace chat settings, keyed by slug under `[workspaces.<slug>]`.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub adjacent_chunks: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            name: None,
            system_prompt: default_system_prompt(),
            temperature: None,
            similarity_threshold: default_similarity_threshold(),
            top_n: default_top_n(),
            adjacent_chunks: 0,
            history_limit: default_history_limit(),
        }
    }
}

fn default_system_prompt() -> String {
    "Given the following conversation, relevant context, and a follow up question, reply with an answer to the current question the user is asking. Return only your response to the question given the above information following the users instructions as needed.".to_string()
}
fn default_similarity_threshold() -> f32 {
    0.25
}
fn default_top_n() -> usize {
    4
}
fn default_history_limit() -> usize {
    20
}

/// A workspace resolved for one chat turn.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub slug: String,
    pub settings: WorkspaceConfig,
}

impl Config {
    /// Look up a workspace by slug.
    pub fn workspace(&self, slug: &str) -> Option<Workspace> {
        self.workspaces.get(slug).map(|settings| Workspace {
            slug: slug.to_string(),
            settings: settings.clone(),
        })
    }

    /// Compression settings for the configured model.
    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.compression.enabled,
            policy: self.compression.policy,
            context_window: self.llm.context_window,
            token_buffer: self.compression.token_buffer,
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate react
    if config.react.max_iterations == 0 {
        anyhow::bail!("react.max_iterations must be >= 1");
    }
    if config.react.observation_max_chars == 0 {
        anyhow::bail!("react.observation_max_chars must be >= 1");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "openai" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be openai.", other),
    }
    if config.llm.context_window <= config.compression.token_buffer {
        anyhow::bail!(
            "llm.context_window ({}) must be greater than compression.token_buffer ({})",
            config.llm.context_window,
            config.compression.token_buffer
        );
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.max_items_per_request == 0 {
        anyhow::bail!("embedding.max_items_per_request must be >= 1");
    }
    if config.embedding.batch_delay_ms < MIN_BATCH_DELAY_MS {
        config.embedding.batch_delay_ms = MIN_BATCH_DELAY_MS;
    }

    // Validate retrieval
    match config.retrieval.backend.as_str() {
        "memory" | "sqlite" => {}
        "operator_filter" | "range_filter" => {
            if config.retrieval.url.is_none() {
                anyhow::bail!(
                    "retrieval.url must be specified when backend is '{}'",
                    config.retrieval.backend
                );
            }
        }
        other => anyhow::bail!(
            "Unknown retrieval backend: '{}'. Must be memory, sqlite, operator_filter, or range_filter.",
            other
        ),
    }

    // Validate workspaces
    for (slug, ws) in &config.workspaces {
        if !(0.0..=1.0).contains(&ws.similarity_threshold) {
            anyhow::bail!("workspaces.{}.similarity_threshold must be in [0.0, 1.0]", slug);
        }
        if ws.top_n == 0 {
            anyhow::bail!("workspaces.{}.top_n must be >= 1", slug);
        }
        if ws.adjacent_chunks > MAX_ADJACENT_CHUNKS {
            anyhow::bail!(
                "workspaces.{}.adjacent_chunks must be between 0 and {}",
                slug,
                MAX_ADJACENT_CHUNKS
            );
        }
    }

    Ok(config)
}
