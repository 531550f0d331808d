//! Turn-level streaming events.
//!
//! `ReActEvent` is the externally observable output of one orchestration
//! loop run. Channels forward these to their surface; any transport can
//! serialize them as-is.
//!
//! Within one turn the order is fixed:
//! - `thinking_delta` / `message_delta` while a provider round streams
//! - `tool_call` then `tool_result` for each requested tool
//! - at most one `error`
//! - one `done`, always last, unless the consumer cancels first

use mnemo_core::provider::TokenUsage;
use mnemo_core::tool::{ToolCallRequest, ToolResult};
use serde::{Deserialize, Serialize};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The provider answered without requesting tools.
    Completed,
    /// `max_iterations` tool rounds ran.
    MaxIterations,
    /// `total_timeout_ms` elapsed.
    Timeout,
    /// The consumer went away.
    Cancelled,
    /// A permanent provider error ended the turn.
    Error,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxIterations => "max_iterations",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

/// Events emitted by the loop during one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReActEvent {
    /// Partial answer text.
    MessageDelta { content: String },

    /// Partial reasoning text.
    ThinkingDelta { content: String },

    /// The model requested a tool.
    ToolCall { call: ToolCallRequest },

    /// A tool finished (or failed, or timed out).
    ToolResult { result: ToolResult },

    /// A permanent failure. Always followed by `done`.
    Error { message: String },

    /// The turn is over.
    Done {
        usage: TokenUsage,
        iterations: u32,
        stop_reason: StopReason,
    },
}

impl ReActEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageDelta { .. } => "message_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_message_delta() {
        let event = ReActEvent::MessageDelta {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"message_delta""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = ReActEvent::ToolCall {
            call: ToolCallRequest::new("call_1", "memory_search", serde_json::json!({"query": "tea"})),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""tool_name":"memory_search""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = ReActEvent::Done {
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
                ..Default::default()
            },
            iterations: 2,
            stop_reason: StopReason::MaxIterations,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
        assert!(json.contains(r#""stop_reason":"max_iterations""#));
        assert!(event.is_done());
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            ReActEvent::ThinkingDelta { content: "x".into() }.event_type(),
            "thinking_delta"
        );
        assert_eq!(
            ReActEvent::ToolResult {
                result: ToolResult::ok("a", "b", 1)
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(
            ReActEvent::Error {
                message: "boom".into()
            }
            .event_type(),
            "error"
        );
    }
}
