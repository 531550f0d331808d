//! Memory search tool — lets the agent explicitly search its long-term memory.
//!
//! Bridges the tool system with semantic memory. The tool is bound to one
//! user and channel when the registry is built for a turn, so the model can
//! only ever see that user's memories. Every returned hit counts as an access
//! from the bound channel, which slows its decay.

use async_trait::async_trait;
use mnemo_core::error::ToolError;
use mnemo_core::memory::{MemoryType, SemanticMemory, SemanticQuery};
use mnemo_core::tool::Tool;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_LIMIT: u64 = 5;
const MAX_LIMIT: u64 = 50;

pub struct MemorySearchTool {
    semantic: Arc<dyn SemanticMemory>,
    user_id: String,
    channel_id: String,
}

impl MemorySearchTool {
    pub fn new(
        semantic: Arc<dyn SemanticMemory>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            semantic,
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

#[derive(Serialize)]
struct MemoryHit {
    id: String,
    content: String,
    #[serde(rename = "type")]
    memory_type: &'static str,
    importance: f64,
    score: f64,
    source_channel: String,
    created_at: String,
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search your long-term memory for facts, preferences and insights about the user. \
         Use this when you need to recall something you've learned or been told before."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of memories to return (default 5)",
                    "default": DEFAULT_LIMIT
                },
                "types": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["fact", "preference", "insight", "conversation"] },
                    "description": "Only return memories of these types"
                },
                "min_importance": {
                    "type": "number",
                    "description": "Ignore memories whose current importance is below this (0-1)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let query = args["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = args["limit"]
            .as_u64()
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT) as usize;

        let mut memory_types = Vec::new();
        if let Some(types) = args.get("types").and_then(|t| t.as_array()) {
            for t in types {
                let name = t.as_str().unwrap_or_default();
                let parsed = MemoryType::parse(name).ok_or_else(|| {
                    ToolError::InvalidArguments(format!("Unknown memory type '{name}'"))
                })?;
                memory_types.push(parsed);
            }
        }

        let mut search = SemanticQuery::new(query).for_user(&self.user_id).limit(limit);
        search.memory_types = memory_types;
        search.min_importance = args["min_importance"].as_f64();

        let hits = self
            .semantic
            .search(&search)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        debug!(query = %query, hits = hits.len(), "memory_search");

        if hits.is_empty() {
            return Ok(format!("No memories found matching '{query}'."));
        }

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            // Best-effort: a failed access bump must not hide the result.
            if let Err(e) = self
                .semantic
                .record_access(&hit.memory.id, &self.channel_id)
                .await
            {
                debug!(memory_id = %hit.memory.id, error = %e, "Access bump failed");
            }
            results.push(MemoryHit {
                id: hit.memory.id,
                content: hit.memory.content,
                memory_type: hit.memory.memory_type.as_str(),
                importance: hit.memory.decayed_importance,
                score: (hit.final_score * 1000.0).round() / 1000.0,
                source_channel: hit.memory.source_channel,
                created_at: hit.memory.created_at.to_rfc3339(),
            });
        }

        serde_json::to_string_pretty(&results).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}
