//! LLM Provider Abstraction
//!
//! Responsibilities:
//! - Unified Provider trait for chat-completion backends
//! - Common request/response types
//! - Streaming callback interface

pub mod openai;

pub use openai::{OpenAiProvider, create_openai_config};

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Provider-specific errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Network error: {source}")]
    Network { source: reqwest::Error },

    #[error("Stream receiver closed")]
    StreamClosed,

    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

/// A single message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, deserialize_with = "deserialize_message_content")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn deserialize_message_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let content = Option::<String>::deserialize(deserializer)?;
    Ok(content.unwrap_or_default())
}

/// Complete request to LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Text of the first choice
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Choice in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Token usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Stream chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    /// Content delta of the first choice, if any
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .map(|d| d.content.as_str())
            .filter(|text| !text.is_empty())
    }
}

/// Stream choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: usize,
    pub delta: Option<StreamDelta>,
    pub finish_reason: Option<String>,
}

/// Incremental message content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    pub role: Option<MessageRole>,
    #[serde(default, deserialize_with = "deserialize_message_content")]
    pub content: String,
}

/// Provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    pub api_key: String,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub default_model: String,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!("{}***", &self.api_key[..4])
        } else {
            "***".to_string()
        };
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider_type", &self.provider_type)
            .field("api_key", &masked_key)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("default_model", &self.default_model)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "local")]
    Local,
}

impl From<&str> for ProviderType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "azure" => ProviderType::Azure,
            "ollama" => ProviderType::Ollama,
            "local" => ProviderType::Local,
            _ => ProviderType::OpenAi,
        }
    }
}

/// Streaming callback
#[async_trait::async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_chunk(&self, chunk: &StreamChunk) -> Result<(), ProviderError>;
    async fn on_complete(&self, response: &CompletionResponse) -> Result<(), ProviderError>;
    async fn on_error(&self, error: &ProviderError);
}

/// LLM Provider trait
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get provider name
    fn name(&self) -> &str;

    /// Complete a request (non-streaming)
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Complete a request with streaming
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        handler: &Arc<dyn StreamHandler>,
    ) -> Result<(), ProviderError>;

    /// Get configuration
    fn config(&self) -> &ProviderConfig;
}

/// Convert provider error from external error
pub fn map_provider_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            401 => ProviderError::Auth {
                message: "Invalid API key".to_string(),
            },
            403 => ProviderError::Auth {
                message: "Access denied".to_string(),
            },
            429 => ProviderError::RateLimited { retry_after: 60 },
            _ => ProviderError::Api {
                message: error.to_string(),
                status_code: Some(status.as_u16()),
            },
        }
    } else {
        ProviderError::Network { source: error }
    }
}
