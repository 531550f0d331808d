//! # mnemo core
//!
//! Domain types, traits, and error definitions for the mnemo agent
//! orchestration engine. This crate has **no framework dependencies** beyond
//! tokio's channel and timer primitives — it defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the orchestration loop (LLM providers, tool
//! executors, the six memory layers, the session store, channel adapters) is
//! defined as a trait here. Implementations live in their respective crates,
//! so backends can be swapped via configuration and tests can use scripted
//! stand-ins.

pub mod channel;
pub mod clock;
pub mod error;
pub mod health;
pub mod memory;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{ChannelAdapter, ChannelCapabilities, ChannelId, InboundMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ChannelError, Error, ErrorKind, MemoryError, ProviderError, ProviderFailure, Result,
    SessionError, ToolError,
};
pub use health::{ComponentHealth, HealthState, HealthStatus};
pub use memory::{
    AccessPattern, ConceptualMemory, DecayConfig, DecayRunStats, Embedder, Entity,
    EpisodicMemory, EpisodicMessage, EpisodicSession, HotMemory, Memory, MemoryLayers,
    MemoryType, MetaMemory, Relation, ScoredMemory, SemanticMemory, SemanticQuery, StreamBuffer,
    StreamEvent, TraversalNode, Turn, WorkingMemory,
};
pub use message::{Message, Role};
pub use provider::{
    ChatChunk, ChatParams, ChunkReceiver, LlmProvider, ProviderCapabilities, TokenUsage,
    ToolDefinition,
};
pub use session::{SessionState, SessionStore, UnifiedSession};
pub use tool::{Tool, ToolCallRequest, ToolExecutor, ToolRegistry, ToolResult};
