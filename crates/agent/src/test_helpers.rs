//! Scripted providers and tools shared by the agent tests.

use async_trait::async_trait;
use mnemo_core::error::{ProviderError, ToolError};
use mnemo_core::provider::{ChatChunk, ChatParams, ChunkReceiver, LlmProvider, TokenUsage};
use mnemo_core::tool::{Tool, ToolCallRequest};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted stream item.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(ChatChunk),
    Fail(ProviderError),
    Pause(Duration),
}

pub fn text(t: &str) -> Step {
    Step::Chunk(ChatChunk::Text { text: t.into() })
}

pub fn thinking(t: &str) -> Step {
    Step::Chunk(ChatChunk::Thinking { text: t.into() })
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> Step {
    Step::Chunk(ChatChunk::ToolCall {
        call: ToolCallRequest::new(id, name, args),
    })
}

pub fn usage(input: u64, output: u64) -> Step {
    Step::Chunk(ChatChunk::Usage {
        usage: TokenUsage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        },
    })
}

/// A provider that replays one scripted round per `chat` call.
///
/// With `repeating`, the last round is replayed forever; otherwise an
/// exhausted script refuses to open a stream.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<Step>>>,
    repeat: Option<Vec<Step>>,
    requests: Mutex<Vec<ChatParams>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Vec<Step>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(round: Vec<Step>) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            repeat: Some(round),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatParams> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, params: ChatParams) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(params);
        let round = {
            let mut rounds = self.rounds.lock().unwrap();
            rounds.pop_front().or_else(|| self.repeat.clone())
        };
        let Some(round) = round else {
            return Err(ProviderError::NotConfigured("script exhausted".into()));
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in round {
                let item = match step {
                    Step::Pause(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    Step::Chunk(c) => Ok(c),
                    Step::Fail(e) => Err(e),
                };
                let stop = item.is_err();
                if tx.send(item).await.is_err() || stop {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        Ok(args["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Sleeps for the given duration before answering.
pub struct SlowTool(pub Duration);

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes its time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(self.0).await;
        Ok("finally".into())
    }
}
