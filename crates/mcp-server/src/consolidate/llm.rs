//! Language-model endpoint access.
//!
//! The consolidator only sees the [`LanguageModel`] trait; the HTTP client
//! below talks to an OpenAI-style chat-completions endpoint in JSON mode.
//! Tests swap in scripted implementations.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

/// Token accounting as reported by the endpoint, when it reports any.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A raw completion: the reply text plus optional usage numbers.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("language model reply was malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One system + user exchange, JSON response mode.
    async fn complete(&self, system: &str, user: &str) -> Result<LlmReply, LlmError>;
}

/// Chat-completions client. The wall-clock timeout lives in the caller, so
/// the underlying HTTP client carries none of its own.
pub struct HttpLlm {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpLlm {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.llm_endpoint.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmReply, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("no choices in reply".into()))?;

        Ok(LlmReply {
            text: choice.message.content,
            usage: parsed.usage,
        })
    }
}
