//! Provider trait — the abstraction over LLM backends.
//!
//! A provider turns [`ChatParams`] into a stream of [`ChatChunk`]s delivered
//! over a bounded `mpsc` channel. The receiver is consumed by exactly one
//! reader; dropping it tells the producer to stop.
//!
//! Every provider advertises an explicit [`ProviderCapabilities`] record
//! instead of being probed at runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::health::ComponentHealth;
use crate::message::Message;
use crate::tool::ToolCallRequest;

/// Parameters for one chat round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// System prompt assembled from the memory hierarchy
    pub system_prompt: String,

    /// The conversation messages (excluding the system prompt)
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ChatParams {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage for one or more provider rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Fold another round's usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// One item of a streaming chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatChunk {
    /// Partial answer text
    Text { text: String },
    /// Partial reasoning text
    Thinking { text: String },
    /// A complete tool call request
    ToolCall { call: ToolCallRequest },
    /// Usage for this round (typically the last chunk)
    Usage { usage: TokenUsage },
}

/// The receiving half of a chat stream.
pub type ChunkReceiver = mpsc::Receiver<Result<ChatChunk, ProviderError>>;

/// What a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub supports_thinking: bool,
    pub supports_streaming: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_vision: false,
            supports_thinking: false,
            supports_streaming: true,
        }
    }
}

/// The core provider trait.
///
/// Every LLM backend implements this trait. The orchestration loop calls
/// `chat()` without knowing which backend (or chain of backends) answers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Capability record for this backend.
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Start a chat round and return its chunk stream.
    ///
    /// An `Err` here means the stream could not be opened; failures after
    /// that arrive as `Err` items on the receiver.
    async fn chat(&self, params: ChatParams) -> Result<ChunkReceiver, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> Result<ComponentHealth, ProviderError> {
        Ok(ComponentHealth::healthy())
    }
}

/// The fully collected result of a chat stream.
#[derive(Debug, Clone, Default)]
pub struct CollectedResponse {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

/// Drain a chunk stream into a single response.
///
/// Used by non-interactive callers (summaries, consolidation) that do not
/// forward deltas.
pub async fn collect_response(mut rx: ChunkReceiver) -> Result<CollectedResponse, ProviderError> {
    let mut out = CollectedResponse::default();
    while let Some(item) = rx.recv().await {
        match item? {
            ChatChunk::Text { text } => out.text.push_str(&text),
            ChatChunk::Thinking { text } => out.thinking.push_str(&text),
            ChatChunk::ToolCall { call } => out.tool_calls.push(call),
            ChatChunk::Usage { usage } => out.usage.add(&usage),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_params_defaults() {
        let params = ChatParams::new("gpt-4o", "be brief");
        assert!((params.temperature - 0.7).abs() < f32::EPSILON);
        assert!(params.messages.is_empty());
        assert!(params.max_tokens.is_none());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_tokens: 2,
            cache_write_tokens: 0,
        });
        total.add(&TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
            cache_read_tokens: 0,
            cache_write_tokens: 4,
        });
        assert_eq!(total.input_tokens, 17);
        assert_eq!(total.output_tokens, 8);
        assert_eq!(total.cache_read_tokens, 2);
        assert_eq!(total.cache_write_tokens, 4);
        assert_eq!(total.total(), 25);
    }

    #[test]
    fn chunk_serialization_is_tagged() {
        let chunk = ChatChunk::Thinking {
            text: "hmm".into(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(r#""type":"thinking""#));
    }

    #[tokio::test]
    async fn collect_response_folds_chunks() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(ChatChunk::Text { text: "Hel".into() })).await.unwrap();
        tx.send(Ok(ChatChunk::Text { text: "lo".into() })).await.unwrap();
        tx.send(Ok(ChatChunk::Usage {
            usage: TokenUsage {
                input_tokens: 3,
                output_tokens: 2,
                ..Default::default()
            },
        }))
        .await
        .unwrap();
        drop(tx);

        let collected = collect_response(rx).await.unwrap();
        assert_eq!(collected.text, "Hello");
        assert_eq!(collected.usage.total(), 5);
    }

    #[tokio::test]
    async fn collect_response_surfaces_stream_error() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(ChatChunk::Text { text: "partial".into() }))
            .await
            .unwrap();
        tx.send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        drop(tx);

        assert!(collect_response(rx).await.is_err());
    }
}
