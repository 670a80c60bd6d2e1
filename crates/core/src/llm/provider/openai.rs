//! OpenAI Provider Implementation
//!
//! Supports:
//! - OpenAI API (Chat Completions)
//! - Compatible APIs (Azure deployments, Ollama, local servers)

use super::*;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Provider
#[derive(Clone)]
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.config.name)
            .field("default_model", &self.config.default_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { config, client })
    }

    /// Get base URL for API calls
    fn get_base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// Build authorization header
    fn get_auth_header(&self) -> String {
        format!("Bearer {}", self.config.api_key)
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        };
        serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(0.7),
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.get_base_url());
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", self.get_auth_header())
            .header("Content-Type", "application/json");
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .json(&self.request_body(request, stream))
            .send()
            .await
            .map_err(|e| ProviderError::Network { source: e })?;

        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Auth {
            message: "Invalid API key".to_string(),
        });
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited { retry_after: 60 });
    } else if status == StatusCode::BAD_REQUEST {
        let error: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({}));
        let message = error["error"]["message"]
            .as_str()
            .unwrap_or("Invalid request")
            .to_string();
        return Err(ProviderError::InvalidRequest { message });
    } else if !status.is_success() {
        return Err(ProviderError::Api {
            message: format!("API returned status {}", status),
            status_code: Some(status.as_u16()),
        });
    }
    Ok(response)
}

/// One parsed server-sent-events line
#[derive(Debug)]
pub(crate) enum SseEvent {
    Chunk(StreamChunk),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => SseEvent::Chunk(chunk),
        Err(e) => {
            debug!("Skipping unparsable stream line: {}", e);
            SseEvent::Skip
        }
    }
}

/// Splits a byte stream into complete lines; partial lines are carried over
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        self.config.provider_type.clone()
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.post(request, false).await?;
        response.json().await.map_err(|e| ProviderError::Api {
            message: format!("Failed to parse response: {}", e),
            status_code: None,
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        handler: &Arc<dyn StreamHandler>,
    ) -> Result<(), ProviderError> {
        let response = match self.post(request, true).await {
            Ok(response) => response,
            Err(e) => {
                handler.on_error(&e).await;
                return Err(e);
            }
        };

        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();
        let mut full_response: Option<CompletionResponse> = None;

        loop {
            let (batch, ended) = match stream.next().await {
                Some(Ok(bytes)) => (lines.push(&bytes), false),
                Some(Err(e)) => {
                    let error = ProviderError::Network { source: e };
                    warn!("Stream interrupted: {}", error);
                    handler.on_error(&error).await;
                    return Err(error);
                }
                None => (lines.finish().into_iter().collect(), true),
            };

            for line in batch {
                match parse_sse_line(&line) {
                    SseEvent::Done => {
                        if let Some(ref response) = full_response {
                            handler.on_complete(response).await?;
                        }
                        return Ok(());
                    }
                    SseEvent::Chunk(chunk) => {
                        if full_response.is_none() {
                            full_response = Some(CompletionResponse {
                                id: chunk.id.clone(),
                                object: "chat.completion".to_string(),
                                created: chunk.created,
                                model: chunk.model.clone(),
                                choices: Vec::new(),
                                usage: None,
                            });
                        }
                        handler.on_chunk(&chunk).await?;
                    }
                    SseEvent::Skip => {}
                }
            }

            if ended {
                break;
            }
        }

        if let Some(ref response) = full_response {
            handler.on_complete(response).await?;
        }
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Create a basic OpenAI configuration
pub fn create_openai_config(name: &str, api_key: &str, default_model: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider_type: ProviderType::OpenAi,
        api_key: api_key.to_string(),
        base_url: None,
        organization: None,
        default_model: default_model.to_string(),
        timeout_ms: 60000,
    }
}
