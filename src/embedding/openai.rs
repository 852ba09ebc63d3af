use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::{parse_vectors, Dispatch, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

/// Embedding provider for OpenAI-compatible `POST {url}/embeddings` APIs.
///
/// Reads the API key from the environment variable named by
/// `embedding.api_key_env`.
pub struct OpenAIProvider {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` is not set or the API key variable is
    /// missing from the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) => key,
            Err(_) => bail!("{} environment variable not set", config.api_key_env),
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Sequential
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(
                status.as_u16(),
                retry_after.as_deref(),
                &body_text,
            ));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| ProviderError::Request {
            status: Some(status.as_u16()),
            message: format!("invalid response body: {}", e),
        })?;
        parse_openai_response(&json)
    }
}

/// Map a non-2xx response to a [`ProviderError`].
///
/// Rate limits are recognised by status 429 or by an
/// `error.type == "rate_limit_error"` marker in the body.
pub(crate) fn classify_failure(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
) -> ProviderError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|json| json.get("error"));
    let marker = error
        .and_then(|e| e.get("type").or_else(|| e.get("code")))
        .and_then(|t| t.as_str())
        .unwrap_or("failed_to_embed");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(500).collect());
    let message = format!("[{}] {}", marker, message);

    if status == 429 || marker == "rate_limit_error" {
        ProviderError::RateLimited {
            retry_after: super::batcher::parse_retry_after(retry_after),
            message,
        }
    } else {
        ProviderError::Request {
            status: Some(status),
            message,
        }
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    let invalid = |what: &str| ProviderError::Request {
        status: None,
        message: format!("Invalid OpenAI response: {}", what),
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed: Vec<(u64, serde_json::Value)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        let embedding = item
            .get("embedding")
            .cloned()
            .ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, embedding));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let embeddings: Vec<serde_json::Value> = indexed.into_iter().map(|(_, e)| e).collect();
    parse_vectors(&embeddings).ok_or_else(|| invalid("embedding is not an array"))
}
