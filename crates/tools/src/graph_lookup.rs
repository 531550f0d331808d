//! Graph lookup tool — walks the conceptual memory graph from a named entity.

use async_trait::async_trait;
use mnemo_core::error::ToolError;
use mnemo_core::memory::ConceptualMemory;
use mnemo_core::tool::Tool;
use std::fmt::Write;
use std::sync::Arc;

const MAX_DEPTH: u64 = 3;

pub struct GraphLookupTool {
    conceptual: Arc<dyn ConceptualMemory>,
}

impl GraphLookupTool {
    pub fn new(conceptual: Arc<dyn ConceptualMemory>) -> Self {
        Self { conceptual }
    }

    fn failed(&self, reason: impl ToString) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Tool for GraphLookupTool {
    fn name(&self) -> &str {
        "graph_lookup"
    }

    fn description(&self) -> &str {
        "Look up what is known about a person, place, project or concept by walking \
         the knowledge graph of entities and their relations."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity": {
                    "type": "string",
                    "description": "Name of the entity to start from"
                },
                "depth": {
                    "type": "integer",
                    "description": "How many hops to follow (1-3, default 2)",
                    "default": 2
                }
            },
            "required": ["entity"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let name = args["entity"]
            .as_str()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'entity' argument".into()))?;
        let depth = args["depth"].as_u64().unwrap_or(2).clamp(1, MAX_DEPTH) as usize;

        let Some(root) = self
            .conceptual
            .find_entity(name)
            .await
            .map_err(|e| self.failed(e))?
        else {
            return Ok(format!("No entity named '{name}' is known."));
        };

        let nodes = self
            .conceptual
            .traverse(&root.id, depth)
            .await
            .map_err(|e| self.failed(e))?;

        if nodes.is_empty() {
            return Ok(format!(
                "{} ({}) has no known relations.",
                root.name, root.entity_type
            ));
        }

        let mut names = std::collections::HashMap::new();
        names.insert(root.id.clone(), root.name.clone());
        for node in &nodes {
            names.insert(node.entity.id.clone(), node.entity.name.clone());
        }

        let mut out = format!("{} ({}):\n", root.name, root.entity_type);
        for node in &nodes {
            let from = names.get(&node.via).map(String::as_str).unwrap_or("?");
            let _ = writeln!(
                out,
                "{}- {} --{}--> {} ({}, weight {:.2})",
                "  ".repeat(node.depth - 1),
                from,
                node.relation_type,
                node.entity.name,
                node.entity.entity_type,
                node.weight
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::memory::{Entity, Relation};
    use mnemo_memory::InMemoryConceptualMemory;

    async fn graph() -> Arc<InMemoryConceptualMemory> {
        let g = Arc::new(InMemoryConceptualMemory::new());
        let alice = g.add_entity(Entity::new("Alice", "person")).await.unwrap();
        let mnemo = g.add_entity(Entity::new("Mnemo", "project")).await.unwrap();
        let rust = g.add_entity(Entity::new("Rust", "language")).await.unwrap();
        g.add_relation(Relation::new(&alice, &mnemo, "works_on", 0.9))
            .await
            .unwrap();
        g.add_relation(Relation::new(&mnemo, &rust, "written_in", 0.7))
            .await
            .unwrap();
        g
    }

    #[tokio::test]
    async fn walks_relations_with_indentation() {
        let tool = GraphLookupTool::new(graph().await);
        let out = tool
            .execute(serde_json::json!({"entity": "alice"}))
            .await
            .unwrap();
        assert!(out.starts_with("Alice (person):"));
        assert!(out.contains("- Alice --works_on--> Mnemo (project, weight 0.90)"));
        assert!(out.contains("  - Mnemo --written_in--> Rust"));
    }

    #[tokio::test]
    async fn depth_one_stops_early() {
        let tool = GraphLookupTool::new(graph().await);
        let out = tool
            .execute(serde_json::json!({"entity": "Alice", "depth": 1}))
            .await
            .unwrap();
        assert!(!out.contains("Rust"));
    }

    #[tokio::test]
    async fn unknown_entity_is_a_message_not_an_error() {
        let tool = GraphLookupTool::new(graph().await);
        let out = tool
            .execute(serde_json::json!({"entity": "Bob"}))
            .await
            .unwrap();
        assert!(out.contains("No entity named 'Bob'"));
        assert!(tool.execute(serde_json::json!({})).await.is_err());
    }
}
