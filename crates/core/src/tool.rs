//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act: search its own memory,
//! walk the knowledge graph, call external services. The loop never calls a
//! [`Tool`] directly; it goes through a [`ToolExecutor`], which owns timeouts
//! and turns every failure into a failed [`ToolResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool, issued by the provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlates the request with its result (matches the LLM's tool_call.id)
    pub call_id: String,

    /// Name of the tool to execute
    pub tool_name: String,

    /// Arguments as a JSON value
    pub args: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (empty on failure)
    pub content: String,

    /// Failure reason, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall time spent executing
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            content: content.into(),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(call_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            content: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// The core Tool trait.
///
/// Each built-in tool (memory_search, graph_lookup, ...) implements this
/// trait and is registered in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "memory_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments, returning its output text.
    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Executes tool calls on behalf of the orchestration loop.
///
/// Implementations must never hang past `timeout` and must never return an
/// error: every failure (unknown tool, bad arguments, panic, timeout) comes
/// back as a failed [`ToolResult`] so the model can react to it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions of every tool this executor can run.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, call: &ToolCallRequest, timeout: Duration) -> ToolResult;
}

/// A registry of available tools.
///
/// The loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Run tools when the LLM requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(&self, call: &ToolCallRequest, timeout: Duration) -> ToolResult {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;

        let Some(tool) = self.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Unknown tool requested");
            return ToolResult::failed(
                &call.call_id,
                ToolError::NotFound(call.tool_name.clone()).to_string(),
                elapsed(),
            );
        };

        // The tool runs on its own task so a timeout can abort it outright.
        let args = call.args.clone();
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(content))) => {
                debug!(tool = %call.tool_name, duration_ms = elapsed(), "Tool succeeded");
                ToolResult::ok(&call.call_id, content, elapsed())
            }
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.tool_name, error = %e, "Tool failed");
                ToolResult::failed(&call.call_id, e.to_string(), elapsed())
            }
            Ok(Err(join_err)) => {
                warn!(tool = %call.tool_name, error = %join_err, "Tool task aborted");
                ToolResult::failed(
                    &call.call_id,
                    ToolError::ExecutionFailed {
                        tool_name: call.tool_name.clone(),
                        reason: join_err.to_string(),
                    }
                    .to_string(),
                    elapsed(),
                )
            }
            Err(_) => {
                handle.abort();
                let timeout_ms = timeout.as_millis() as u64;
                warn!(tool = %call.tool_name, timeout_ms, "Tool timed out, task aborted");
                ToolResult::failed(
                    &call.call_id,
                    ToolError::Timeout {
                        tool_name: call.tool_name.clone(),
                        timeout_ms,
                    }
                    .to_string(),
                    elapsed(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
            args["text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }
    }

    /// Sleeps forever; flips a flag if it ever finishes.
    struct StuckTool {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for StuckTool {
        fn name(&self) -> &str {
            "stuck"
        }
        fn description(&self) -> &str {
            "Never returns"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok("done".into())
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry_with_echo();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let registry = registry_with_echo();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn executes_tool() {
        let registry = registry_with_echo();
        let call = ToolCallRequest::new("call_1", "echo", serde_json::json!({"text": "hello world"}));
        let result = registry.execute(&call, Duration::from_secs(5)).await;
        assert!(result.success);
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.content, "hello world");
    }

    #[tokio::test]
    async fn tool_error_becomes_failed_result() {
        let registry = registry_with_echo();
        let call = ToolCallRequest::new("call_2", "echo", serde_json::json!({}));
        let result = registry.execute(&call, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing 'text'"));
    }

    #[tokio::test]
    async fn missing_tool_becomes_failed_result() {
        let registry = ToolRegistry::new();
        let call = ToolCallRequest::new("call_3", "nonexistent", serde_json::json!({}));
        let result = registry.execute(&call, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("nonexistent"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_tool_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StuckTool {
            finished: finished.clone(),
        }));

        let call = ToolCallRequest::new("call_4", "stuck", serde_json::json!({}));
        let result = registry.execute(&call, Duration::from_millis(100)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));

        // Even if time moves past the tool's own sleep, the aborted task never completes.
        tokio::time::advance(Duration::from_secs(7200)).await;
        tokio::task::yield_now().await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
