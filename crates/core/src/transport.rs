//! Transport adapter
//!
//! Turns a transcript into model output: either a stream of text chunks
//! ending in `Done` / `Error`, or a single completed string. The core only
//! depends on the [`Transport`] trait; [`ProviderTransport`] bridges any
//! [`LlmProvider`] into it.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, OpenAiProvider, ProviderConfig,
    ProviderError, ProviderType, StreamChunk, StreamHandler,
};
use crate::protocol::{Turn, to_messages};

const CHANNEL_CAPACITY: usize = 64;

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport cancelled")]
    Cancelled,

    #[error("Transport failed: {0}")]
    Failed(String),
}

impl From<ProviderError> for TransportError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::StreamClosed => TransportError::Cancelled,
            other => TransportError::Failed(other.to_string()),
        }
    }
}

/// One event of a streamed completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Chunk(String),
    Done,
    Error(TransportError),
}

/// Stream of completion events, in generation order
pub type EventStream = BoxStream<'static, TransportEvent>;

/// Producer of model output for a transcript
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start a streamed completion
    async fn stream(
        &self,
        system_prompt: &str,
        transcript: &[Turn],
    ) -> Result<EventStream, TransportError>;

    /// Run a completion to the end and return its text
    async fn complete(
        &self,
        system_prompt: &str,
        transcript: &[Turn],
    ) -> Result<String, TransportError>;
}

/// Forwards provider chunks into a channel
struct ChannelStreamHandler {
    tx: mpsc::Sender<TransportEvent>,
}

#[async_trait::async_trait]
impl StreamHandler for ChannelStreamHandler {
    async fn on_chunk(&self, chunk: &StreamChunk) -> Result<(), ProviderError> {
        match chunk.delta_text() {
            Some(text) => self
                .tx
                .send(TransportEvent::Chunk(text.to_string()))
                .await
                .map_err(|_| ProviderError::StreamClosed),
            None => Ok(()),
        }
    }

    async fn on_complete(&self, _response: &CompletionResponse) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn on_error(&self, error: &ProviderError) {
        debug!("Provider stream error: {}", error);
    }
}

/// Receiver stream that aborts its producer task when dropped
struct AbortOnDrop {
    inner: ReceiverStream<TransportEvent>,
    task: JoinHandle<()>,
}

impl Stream for AbortOnDrop {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`Transport`] backed by an [`LlmProvider`]
#[derive(Clone)]
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for ProviderTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTransport")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Build an OpenAI-compatible transport from configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let provider_type = ProviderType::from(config.provider.as_str());
        let needs_key = matches!(provider_type, ProviderType::OpenAi | ProviderType::Azure);
        let api_key = config.api_key.clone().unwrap_or_default();
        if needs_key && api_key.is_empty() {
            return Err(ProviderError::InvalidConfig {
                message: format!("No API key configured for provider '{}'", config.provider),
            });
        }

        let provider = OpenAiProvider::new(ProviderConfig {
            name: config.provider.clone(),
            provider_type,
            api_key,
            base_url: config.base_url.clone(),
            organization: config.organization.clone(),
            default_model: config.model.clone(),
            timeout_ms: config.timeout.saturating_mul(1000),
        })?;

        Ok(Self::new(Arc::new(provider), config.model.clone())
            .with_sampling(config.temperature, config.max_tokens))
    }

    fn request(&self, system_prompt: &str, transcript: &[Turn], stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: to_messages(system_prompt, transcript),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }
}

#[async_trait::async_trait]
impl Transport for ProviderTransport {
    async fn stream(
        &self,
        system_prompt: &str,
        transcript: &[Turn],
    ) -> Result<EventStream, TransportError> {
        let request = self.request(system_prompt, transcript, true);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let provider = Arc::clone(&self.provider);

        let task = tokio::spawn(async move {
            let handler: Arc<dyn StreamHandler> = Arc::new(ChannelStreamHandler { tx: tx.clone() });
            let last = match provider.complete_streaming(&request, &handler).await {
                Ok(()) => TransportEvent::Done,
                Err(ProviderError::StreamClosed) => return,
                Err(e) => {
                    warn!("Streaming completion failed: {}", e);
                    TransportEvent::Error(e.into())
                }
            };
            // receiver may already be gone
            let _ = tx.send(last).await;
        });

        Ok(AbortOnDrop {
            inner: ReceiverStream::new(rx),
            task,
        }
        .boxed())
    }

    async fn complete(
        &self,
        system_prompt: &str,
        transcript: &[Turn],
    ) -> Result<String, TransportError> {
        let request = self.request(system_prompt, transcript, false);
        let response = self.provider.complete(&request).await?;
        Ok(response.text().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{
        Choice, Message, MessageRole, StreamChoice, StreamDelta, create_openai_config,
    };

    /// Replays scripted deltas through the streaming handler
    struct ScriptedProvider {
        config: ProviderConfig,
        deltas: Vec<&'static str>,
        fail_after: Option<usize>,
    }

    impl ScriptedProvider {
        fn new(deltas: Vec<&'static str>) -> Self {
            Self {
                config: create_openai_config("mock", "test", "mock-model"),
                deltas,
                fail_after: None,
            }
        }
    }

    fn chunk(text: &str) -> StreamChunk {
        StreamChunk {
            id: "c".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "mock-model".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: Some(StreamDelta {
                    role: None,
                    content: text.to_string(),
                }),
                finish_reason: None,
            }],
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::OpenAi
        }
        fn name(&self) -> &str {
            "mock-provider"
        }
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                id: "r".to_string(),
                object: "chat.completion".to_string(),
                created: 0,
                model: request.model.clone(),
                choices: vec![Choice {
                    index: 0,
                    message: Message {
                        role: MessageRole::Assistant,
                        content: format!("{} messages", request.messages.len()),
                        name: None,
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            })
        }
        async fn complete_streaming(
            &self,
            _request: &CompletionRequest,
            handler: &Arc<dyn StreamHandler>,
        ) -> Result<(), ProviderError> {
            for (i, delta) in self.deltas.iter().enumerate() {
                if self.fail_after == Some(i) {
                    return Err(ProviderError::Api {
                        message: "boom".to_string(),
                        status_code: Some(500),
                    });
                }
                handler.on_chunk(&chunk(delta)).await?;
            }
            Ok(())
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
    }

    fn transcript() -> Vec<Turn> {
        vec![Turn::user("hello").unwrap()]
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_then_done() {
        let transport = ProviderTransport::new(
            Arc::new(ScriptedProvider::new(vec!["Hel", "", "lo"])),
            "mock-model",
        );
        let events: Vec<_> = transport
            .stream("sys", &transcript())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Chunk("Hel".to_string()),
                TransportEvent::Chunk("lo".to_string()),
                TransportEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_reports_failure() {
        let mut provider = ScriptedProvider::new(vec!["a", "b"]);
        provider.fail_after = Some(1);
        let transport = ProviderTransport::new(Arc::new(provider), "mock-model");
        let events: Vec<_> = transport
            .stream("sys", &transcript())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TransportEvent::Chunk("a".to_string()));
        assert!(matches!(
            &events[1],
            TransportEvent::Error(TransportError::Failed(msg)) if msg.contains("boom")
        ));
    }

    #[tokio::test]
    async fn test_complete_includes_system_prompt() {
        let transport =
            ProviderTransport::new(Arc::new(ScriptedProvider::new(vec![])), "mock-model");
        let text = transport.complete("sys", &transcript()).await.unwrap();
        assert_eq!(text, "2 messages");
    }

    #[test]
    fn test_from_config_requires_api_key() {
        let config = LlmConfig::default();
        assert!(matches!(
            ProviderTransport::from_config(&config),
            Err(ProviderError::InvalidConfig { .. })
        ));

        let config = LlmConfig {
            provider: "ollama".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            ..LlmConfig::default()
        };
        assert!(ProviderTransport::from_config(&config).is_ok());
    }

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(
            TransportError::from(ProviderError::StreamClosed),
            TransportError::Cancelled
        );
        assert!(matches!(
            TransportError::from(ProviderError::RateLimited { retry_after: 1 }),
            TransportError::Failed(_)
        ));
    }
}
