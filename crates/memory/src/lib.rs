//! Memory hierarchy implementations for mnemo.
//!
//! In-memory backends for the six layers defined in `mnemo_core::memory`,
//! plus the pieces that age and distil them: the decay calculator, hybrid
//! scoring, the consolidation engine and the maintenance scheduler.

pub mod conceptual;
pub mod consolidation;
pub mod decay;
pub mod embedding;
pub mod episodic;
pub mod maintenance;
pub mod meta;
pub mod scoring;
pub mod semantic;
pub mod stream_buffer;
pub mod working;

use std::sync::Arc;

use mnemo_config::MemoryConfig;
use mnemo_core::memory::MemoryLayers;

pub use conceptual::InMemoryConceptualMemory;
pub use consolidation::{ConsolidationEngine, ConsolidationReport};
pub use decay::{DecayInput, decay, decay_batch, should_delete};
pub use embedding::HashingEmbedder;
pub use episodic::InMemoryEpisodicMemory;
pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport};
pub use meta::InMemoryMetaMemory;
pub use scoring::{HybridWeights, cosine_similarity, hybrid_score, text_score};
pub use semantic::InMemorySemanticMemory;
pub use stream_buffer::InMemoryStreamBuffer;
pub use working::InMemoryWorkingMemory;

/// Build all six layers with in-memory backends from configuration.
pub fn in_memory_layers(config: &MemoryConfig) -> MemoryLayers {
    let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimensions));
    let weights = HybridWeights {
        vector: config.vector_weight,
        text: config.keyword_weight,
    };
    MemoryLayers {
        stream: Arc::new(InMemoryStreamBuffer::new()),
        working: Arc::new(InMemoryWorkingMemory::new(config.working_memory_cap)),
        episodic: Arc::new(InMemoryEpisodicMemory::new()),
        semantic: Arc::new(InMemorySemanticMemory::new(embedder).with_weights(weights)),
        conceptual: Arc::new(InMemoryConceptualMemory::new()),
        meta: Arc::new(InMemoryMetaMemory::new()),
    }
}
