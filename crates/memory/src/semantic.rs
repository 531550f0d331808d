//! In-memory semantic memory with hybrid search and an in-place decay sweep.

use async_trait::async_trait;
use mnemo_core::clock::{Clock, SystemClock};
use mnemo_core::error::MemoryError;
use mnemo_core::health::ComponentHealth;
use mnemo_core::memory::{
    DecayConfig, DecayRunStats, Embedder, Memory, ScoredMemory, SemanticMemory, SemanticQuery,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decay::{DecayInput, decay, should_delete};
use crate::embedding::HashingEmbedder;
use crate::scoring::{HybridWeights, cosine_similarity, hybrid_score, text_score};

pub struct InMemorySemanticMemory {
    memories: RwLock<HashMap<String, Memory>>,
    embedder: Arc<dyn Embedder>,
    weights: HybridWeights,
    clock: Arc<dyn Clock>,
}

impl InMemorySemanticMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            embedder,
            weights: HybridWeights::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn matches_filters(memory: &Memory, query: &SemanticQuery) -> bool {
        if let Some(user) = &query.user_id {
            if &memory.user_id != user {
                return false;
            }
        }
        if !query.memory_types.is_empty() && !query.memory_types.contains(&memory.memory_type) {
            return false;
        }
        if let Some(min) = query.min_importance {
            if memory.decayed_importance < min {
                return false;
            }
        }
        if let Some(channel) = &query.channel_id {
            if !memory.channel_mentions.contains_key(channel) {
                return false;
            }
        }
        true
    }
}

impl Default for InMemorySemanticMemory {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

#[async_trait]
impl SemanticMemory for InMemorySemanticMemory {
    async fn store(&self, mut memory: Memory) -> Result<String, MemoryError> {
        if memory.id.is_empty() {
            memory.id = Uuid::new_v4().to_string();
        }
        if memory.embedding.is_empty() {
            memory.embedding = self.embedder.embed(&memory.content).await?;
        }
        let id = memory.id.clone();
        debug!(memory_id = %id, memory_type = %memory.memory_type, "Storing semantic memory");
        self.memories.write().await.insert(id.clone(), memory);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        Ok(self.memories.read().await.get(id).cloned())
    }

    async fn search(&self, query: &SemanticQuery) -> Result<Vec<ScoredMemory>, MemoryError> {
        if query.text.trim().is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(&query.text).await?;

        let memories = self.memories.read().await;
        let mut results: Vec<ScoredMemory> = memories
            .values()
            .filter(|m| Self::matches_filters(m, query))
            .filter_map(|m| {
                let vector_score = cosine_similarity(&m.embedding, &query_embedding);
                let text = text_score(&query.text, &m.content);
                let final_score = hybrid_score(vector_score, text, self.weights);
                (final_score > 0.0 && final_score >= query.min_score).then(|| ScoredMemory {
                    memory: m.clone(),
                    vector_score,
                    text_score: text,
                    final_score,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn record_access(&self, id: &str, channel_id: &str) -> Result<(), MemoryError> {
        let now = self.clock.now();
        let mut memories = self.memories.write().await;
        let memory = memories
            .get_mut(id)
            .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
        memory.access_count = memory.access_count.saturating_add(1);
        memory.last_accessed = now;
        *memory.channel_mentions.entry(channel_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn set_connection_count(&self, id: &str, count: u32) -> Result<(), MemoryError> {
        let mut memories = self.memories.write().await;
        let memory = memories
            .get_mut(id)
            .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
        memory.connection_count = count;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Memory>, MemoryError> {
        Ok(self.memories.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        Ok(self.memories.write().await.remove(id).is_some())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.memories.read().await.len())
    }

    async fn decay(&self, config: &DecayConfig) -> Result<DecayRunStats, MemoryError> {
        let now = self.clock.now();

        // Compute on a snapshot so live reads are never blocked for the whole pass.
        let snapshot: Vec<(String, DecayInput)> = {
            let memories = self.memories.read().await;
            memories
                .values()
                .map(|m| (m.id.clone(), DecayInput::from_memory(m, now)))
                .collect()
        };

        let mut stats = DecayRunStats::default();
        let mut updates: Vec<(String, f64)> = Vec::with_capacity(snapshot.len());
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for (id, input) in snapshot {
            let value = decay(&input, config);
            if !value.is_finite() {
                warn!(memory_id = %id, "Decay produced a non-finite value, skipping");
                stats.failed += 1;
                continue;
            }
            stats.processed += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
            updates.push((id, value));
        }

        let mut memories = self.memories.write().await;
        for (id, value) in updates {
            if should_delete(value, config) {
                if memories.remove(&id).is_some() {
                    stats.deleted += 1;
                }
            } else if let Some(memory) = memories.get_mut(&id) {
                memory.decayed_importance = value;
                memory.last_decayed_at = Some(now);
            }
        }

        if stats.processed > 0 {
            stats.min_importance = min;
            stats.max_importance = max;
            stats.avg_importance = sum / stats.processed as f64;
        }

        info!(
            processed = stats.processed,
            deleted = stats.deleted,
            failed = stats.failed,
            avg = stats.avg_importance,
            "Semantic decay pass complete"
        );
        Ok(stats)
    }

    async fn health_check(&self) -> Result<ComponentHealth, MemoryError> {
        let start = std::time::Instant::now();
        let _ = self.memories.read().await.len();
        Ok(ComponentHealth::healthy().with_latency(start.elapsed()))
    }
}
