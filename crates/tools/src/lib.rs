//! Built-in tool implementations for mnemo.
//!
//! Tools give the agent explicit access to its own memory: hybrid search over
//! semantic memory and walks over the conceptual graph.

pub mod graph_lookup;
pub mod memory_search;

use mnemo_core::memory::MemoryLayers;
use mnemo_core::tool::ToolRegistry;
use std::sync::Arc;

pub use graph_lookup::GraphLookupTool;
pub use memory_search::MemorySearchTool;

/// Register the memory tools for one user's turn on top of `base`.
pub fn memory_registry(
    base: &ToolRegistry,
    layers: &MemoryLayers,
    user_id: &str,
    channel_id: &str,
) -> ToolRegistry {
    let mut registry = base.clone();
    registry.register(Arc::new(MemorySearchTool::new(
        Arc::clone(&layers.semantic),
        user_id,
        channel_id,
    )));
    registry.register(Arc::new(GraphLookupTool::new(Arc::clone(
        &layers.conceptual,
    ))));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::tool::ToolExecutor;

    #[test]
    fn registry_has_both_memory_tools() {
        let layers = mnemo_memory::in_memory_layers(&Default::default());
        let registry = memory_registry(&ToolRegistry::new(), &layers, "u1", "cli");
        assert_eq!(registry.names(), vec!["graph_lookup", "memory_search"]);
        assert_eq!(registry.definitions().len(), 2);
    }
}
