//! Chat completion capability.
//!
//! The reasoning loop only needs whole, non-streaming completions. An absent
//! or empty completion is returned as `Completion { text: None }` or an
//! empty string, never as an error, so the loop can tell "the model said
//! nothing" apart from "the request failed".

use async_trait::async_trait;
use ragloop_core::models::ChatMessage;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// One completion result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// The text, or `None` when absent or the empty string. Whitespace
    /// counts as a reply.
    pub fn non_empty(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Temperature used when the workspace does not set one.
    fn default_temperature(&self) -> f32;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Completion, LlmError>;
}

/// Client for OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    default_temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::MissingApiKey {
            var: config.api_key_env.clone(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            default_temperature: config.default_temperature,
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    fn default_temperature(&self) -> f32 {
        self.default_temperature
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Completion, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::ResponseParse {
                message: e.to_string(),
            })?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<Completion, LlmError> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "missing choices array".to_string(),
        })?;
    let text = choices
        .first()
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::to_string);
    Ok(Completion { text })
}

/// Instantiate the configured completion provider.
pub fn create_llm(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatCompletion>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
