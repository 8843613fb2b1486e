use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{ChatMessage, ChatModel, GenerationError};

pub const DEFAULT_TOGETHER_BASE_URL: &str = "https://api.together.xyz";
pub const DEFAULT_TOGETHER_MODEL: &str = "meta-llama/Llama-3-8b-chat-hf";

#[derive(Clone)]
pub struct TogetherConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl TogetherConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_TOGETHER_BASE_URL.to_string(),
            model: DEFAULT_TOGETHER_MODEL.to_string(),
            api_key: api_key.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl std::fmt::Debug for TogetherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TogetherConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Chat completions from Together AI's OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct TogetherChatModel {
    http: Client,
    endpoint: Url,
    config: TogetherConfig,
}

impl TogetherChatModel {
    pub fn new(http: Client, config: TogetherConfig) -> Result<Self, GenerationError> {
        let base = config.base_url.trim().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/v1/chat/completions"))?;

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatModel for TogetherChatModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let payload = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(self.config.api_key.as_str())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<CompletionResponse>()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        let text = completion_text(body)?;
        debug!(model = %self.config.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

fn completion_text(body: CompletionResponse) -> Result<String, GenerationError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| GenerationError::Malformed("completion has no message content".to_string()))
}
