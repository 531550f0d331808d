//! Token-budgeted context assembly.
//!
//! | Slot | Source | Packing order |
//! |------|--------|---------------|
//! | system_prompt | configuration | single item, truncated if needed |
//! | stream_buffer | stream buffer | newest first |
//! | working_memory | working memory | newest first |
//! | semantic_search | semantic memory | best score first |
//! | graph_traversal | conceptual memory | breadth-first |
//! | session_archive | episodic memory | newest session first |
//! | meta_memory | meta memory prefetch | most recently matched first |
//! | tool_definitions | tool executor | registry order |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyRequest, ContextAssembler, ContextSection, PreflightReport,
    SlotUsage,
};
pub use token::{
    CacheStats, CachedTokenCounter, ContentHasher, HeuristicCounter, Sha256Hasher, TokenCountError,
    TokenCounter, estimate_tokens,
};
