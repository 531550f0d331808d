//! Channel adapter contract — the edge between a chat surface and the engine.
//!
//! A channel adapter only has to deliver inbound text and accept outbound
//! text (or a stream of deltas). Framing, authentication and rendering stay
//! inside the adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::health::ComponentHealth;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The channel this message arrived on
    pub channel_id: ChannelId,

    /// Platform-independent user identifier
    pub user_id: String,

    /// The text content
    pub content: String,

    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel_id: ChannelId,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_id,
            user_id: user_id.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}

/// What a channel surface can render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    pub supports_streaming: bool,
    pub supports_markdown: bool,
    pub supports_vision: bool,
    pub supports_voice: bool,
}

/// The channel adapter trait.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique ID for this channel instance (e.g., "cli", "telegram").
    fn id(&self) -> &ChannelId;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Wait for the next inbound message. `None` means the channel closed.
    async fn receive(&self) -> Result<Option<InboundMessage>, ChannelError>;

    /// Deliver a complete outbound message.
    async fn send(&self, user_id: &str, content: &str) -> Result<(), ChannelError>;

    /// Deliver one streamed fragment. Only called when
    /// `capabilities().supports_streaming` is set.
    async fn send_delta(&self, user_id: &str, delta: &str) -> Result<(), ChannelError> {
        self.send(user_id, delta).await
    }

    async fn health_check(&self) -> Result<ComponentHealth, ChannelError> {
        Ok(ComponentHealth::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_creation() {
        let msg = InboundMessage::new(ChannelId("cli".into()), "u1", "Hello bot!");
        assert_eq!(msg.channel_id.as_str(), "cli");
        assert_eq!(msg.content, "Hello bot!");
    }

    #[test]
    fn capabilities_default_to_plain_text() {
        let caps = ChannelCapabilities::default();
        assert!(!caps.supports_streaming);
        assert!(!caps.supports_markdown);
    }
}
