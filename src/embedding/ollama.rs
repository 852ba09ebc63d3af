use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::{parse_vectors, Dispatch, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const MAX_IN_FLIGHT: usize = 4;

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Local inference has no request quota, so
/// batches are dispatched concurrently.
pub struct OllamaProvider {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Concurrent {
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                status: None,
                message: format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after: super::batcher::parse_retry_after(retry_after.as_deref()),
                    message: format!("Ollama API error {}: {}", status, body_text),
                });
            }
            return Err(ProviderError::Request {
                status: Some(status.as_u16()),
                message: format!("Ollama API error {}: {}", status, body_text),
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| ProviderError::Request {
            status: Some(status.as_u16()),
            message: format!("invalid response body: {}", e),
        })?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|items| parse_vectors(items))
        .ok_or_else(|| ProviderError::Request {
            status: None,
            message: "Invalid Ollama response: missing embeddings array".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 0.0]]});
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            vec![vec![0.5, 0.25], vec![1.0, 0.0]]
        );
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(OllamaProvider::new(&config).is_err());
    }
}
