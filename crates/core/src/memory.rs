//! Memory layer contracts — the six-layer hierarchy behind the context assembler.
//!
//! | Layer       | Holds                                        | Lifetime        |
//! |-------------|----------------------------------------------|-----------------|
//! | stream      | raw inbound/outbound events, FIFO            | minutes-hours   |
//! | working     | the last N turns per user                    | one session     |
//! | episodic    | whole sessions with summaries and topics     | long            |
//! | semantic    | extracted facts/preferences/insights, decays | long            |
//! | conceptual  | entity/relation graph                        | long            |
//! | meta        | which memories were matched, from where      | pruned by age   |
//!
//! Every layer is a narrow async trait so an in-memory or a durable backend
//! can satisfy it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::health::ComponentHealth;
use crate::message::Role;

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

// ── Stream buffer ─────────────────────────────────────────────────────────

/// One raw event in the stream buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Assigned by the buffer on push; empty before that.
    #[serde(default)]
    pub id: String,
    pub event_type: String,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            event_type: event_type.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            session_id: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Append-only FIFO of raw events.
///
/// `consume` advances a single read cursor: events come out in push order,
/// each at most once. Events trimmed before they were consumed are gone for
/// good; the cursor never rewinds.
#[async_trait]
pub trait StreamBuffer: Send + Sync {
    /// Append an event, returning its assigned ID.
    async fn push(&self, event: StreamEvent) -> MemoryResult<String>;

    /// Take up to `count` unconsumed events, oldest first.
    async fn consume(&self, count: usize) -> MemoryResult<Vec<StreamEvent>>;

    /// The `count` newest events for a user, oldest first. Does not move the cursor.
    async fn recent(&self, user_id: &str, count: usize) -> MemoryResult<Vec<StreamEvent>>;

    /// Evict oldest events until at most `max_len` remain. Returns how many were removed.
    async fn trim(&self, max_len: usize) -> MemoryResult<usize>;

    async fn len(&self) -> MemoryResult<usize>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Working memory ────────────────────────────────────────────────────────

/// One conversational turn held in working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded per-user ordered turn list. Oldest turns are evicted on overflow.
#[async_trait]
pub trait WorkingMemory: Send + Sync {
    async fn add_turn(&self, user_id: &str, turn: Turn) -> MemoryResult<()>;

    /// All held turns for a user, oldest first.
    async fn get_turns(&self, user_id: &str) -> MemoryResult<Vec<Turn>>;

    /// Collapse the held turns into one summary string. `None` if there are no turns.
    async fn compress(&self, user_id: &str) -> MemoryResult<Option<String>>;

    /// Remove and return every held turn.
    async fn flush(&self, user_id: &str) -> MemoryResult<Vec<Turn>>;

    async fn clear(&self, user_id: &str) -> MemoryResult<()>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Episodic memory ───────────────────────────────────────────────────────

/// A message recorded in an episodic session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMessage {
    pub role: Role,
    pub content: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A whole conversation as remembered after (or during) the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicSession {
    pub session_id: String,
    pub user_id: String,
    /// Channels the session touched, in order of first use.
    pub channels: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub messages: Vec<EpisodicMessage>,
    #[serde(default)]
    pub consolidated: bool,
    /// Failed consolidation attempts so far.
    #[serde(default)]
    pub consolidation_failures: u32,
}

impl EpisodicSession {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            channels: vec![channel_id.into()],
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
            topics: Vec::new(),
            messages: Vec::new(),
            consolidated: false,
            consolidation_failures: 0,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[async_trait]
pub trait EpisodicMemory: Send + Sync {
    async fn create_session(&self, session: EpisodicSession) -> MemoryResult<()>;

    async fn get_session(&self, session_id: &str) -> MemoryResult<Option<EpisodicSession>>;

    /// Close a session with its summary and topics. Ended sessions enter the
    /// consolidation queue.
    async fn end_session(
        &self,
        session_id: &str,
        summary: String,
        topics: Vec<String>,
    ) -> MemoryResult<()>;

    async fn delete_session(&self, session_id: &str) -> MemoryResult<bool>;

    /// Append a message. Its channel is added to the session's channel list if new.
    async fn add_message(&self, session_id: &str, message: EpisodicMessage) -> MemoryResult<()>;

    /// A user's most recent sessions, newest first.
    async fn get_recent_sessions(&self, user_id: &str, limit: usize)
    -> MemoryResult<Vec<EpisodicSession>>;

    async fn search_by_topic(
        &self,
        user_id: &str,
        topic: &str,
        limit: usize,
    ) -> MemoryResult<Vec<EpisodicSession>>;

    async fn search_by_content(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<EpisodicSession>>;

    /// Ended sessions not yet consolidated that have failed fewer than
    /// `max_attempts` times. Fewest failures first, then oldest first.
    async fn get_unconsolidated(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> MemoryResult<Vec<EpisodicSession>>;

    async fn mark_consolidated(&self, session_id: &str) -> MemoryResult<()>;

    /// Count a failed consolidation attempt. Returns the new failure count.
    async fn record_consolidation_failure(&self, session_id: &str) -> MemoryResult<u32>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Semantic memory ───────────────────────────────────────────────────────

/// Kind of long-term memory. Drives the decay multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    Insight,
    Conversation,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Insight => "insight",
            Self::Conversation => "conversation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "preference" => Some(Self::Preference),
            "insight" => Some(Self::Insight),
            "conversation" => Some(Self::Conversation),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-term semantic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    /// Original importance in [0, 1]; the ceiling decay never exceeds.
    pub importance: f64,
    /// Filled in by the store if empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    pub source_channel: String,
    /// Mentions per channel.
    #[serde(default)]
    pub channel_mentions: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session: Option<String>,
    /// Current importance after decay.
    pub decayed_importance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decayed_at: Option<DateTime<Utc>>,
    /// Number of graph relations pointing at this memory's subject.
    #[serde(default)]
    pub connection_count: u32,
}

impl Memory {
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
        importance: f64,
        source_channel: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let importance = importance.clamp(0.0, 1.0);
        let source_channel = source_channel.into();
        let mut channel_mentions = BTreeMap::new();
        channel_mentions.insert(source_channel.clone(), 1);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            memory_type,
            importance,
            embedding: Vec::new(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            source_channel,
            channel_mentions,
            source_session: None,
            decayed_importance: importance,
            last_decayed_at: None,
            connection_count: 0,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.source_session = Some(session_id.into());
        self
    }

    /// Number of distinct channels this memory was mentioned in.
    pub fn channel_count(&self) -> usize {
        self.channel_mentions.len()
    }
}

/// A semantic search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticQuery {
    pub text: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Empty means every type.
    #[serde(default)]
    pub memory_types: Vec<MemoryType>,
    /// Compared against decayed importance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f64>,
    /// Only memories mentioned in this channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub min_score: f64,
}

fn default_limit() -> usize {
    10
}

impl SemanticQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: default_limit(),
            user_id: None,
            memory_types: Vec::new(),
            min_importance: None,
            channel_id: None,
            min_score: 0.0,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A search hit with its score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub vector_score: f64,
    pub text_score: f64,
    pub final_score: f64,
}

/// Tuning for the importance decay calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Base decay rate per hour.
    pub base_rate: f64,
    pub fact_multiplier: f64,
    pub preference_multiplier: f64,
    pub insight_multiplier: f64,
    pub conversation_multiplier: f64,
    /// Stability gained from repeated access.
    pub k_access: f64,
    /// Resistance per graph connection.
    pub k_relation: f64,
    /// Slowdown per distinct channel mention.
    pub k_channel: f64,
    pub recency_age_threshold_hours: f64,
    pub recency_access_threshold_hours: f64,
    pub recency_boost: f64,
    /// Floor as a fraction of the original importance.
    pub min_retention: f64,
    /// Memories whose decayed importance falls below this are deleted.
    pub delete_threshold: f64,
}

impl DecayConfig {
    pub fn type_multiplier(&self, memory_type: MemoryType) -> f64 {
        match memory_type {
            MemoryType::Fact => self.fact_multiplier,
            MemoryType::Preference => self.preference_multiplier,
            MemoryType::Insight => self.insight_multiplier,
            MemoryType::Conversation => self.conversation_multiplier,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.005,
            fact_multiplier: 0.5,
            preference_multiplier: 0.8,
            insight_multiplier: 1.0,
            conversation_multiplier: 2.0,
            k_access: 0.5,
            k_relation: 0.1,
            k_channel: 0.2,
            recency_age_threshold_hours: 168.0,
            recency_access_threshold_hours: 24.0,
            recency_boost: 1.2,
            min_retention: 0.1,
            delete_threshold: 0.05,
        }
    }
}

/// Outcome of one decay pass over semantic memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayRunStats {
    pub processed: usize,
    pub deleted: usize,
    /// Items skipped because their decay could not be computed.
    pub failed: usize,
    pub min_importance: f64,
    pub max_importance: f64,
    pub avg_importance: f64,
}

#[async_trait]
pub trait SemanticMemory: Send + Sync {
    /// Store a memory, embedding it if needed. Returns its ID.
    async fn store(&self, memory: Memory) -> MemoryResult<String>;

    async fn get(&self, id: &str) -> MemoryResult<Option<Memory>>;

    /// Hybrid search: `final = 0.7 * cosine + 0.3 * text`, best first.
    async fn search(&self, query: &SemanticQuery) -> MemoryResult<Vec<ScoredMemory>>;

    /// Bump access count, last-accessed time and the channel mention counter.
    async fn record_access(&self, id: &str, channel_id: &str) -> MemoryResult<()>;

    /// Store the number of graph relations touching this memory's subjects.
    async fn set_connection_count(&self, id: &str, count: u32) -> MemoryResult<()>;

    /// Every stored memory, in no particular order.
    async fn list(&self) -> MemoryResult<Vec<Memory>>;

    async fn delete(&self, id: &str) -> MemoryResult<bool>;

    async fn count(&self) -> MemoryResult<usize>;

    /// Apply the decay calculator to every memory and delete those below threshold.
    async fn decay(&self, config: &DecayConfig) -> MemoryResult<DecayRunStats>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Conceptual memory ─────────────────────────────────────────────────────

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            mention_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A directed, labeled, weighted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            weight,
            updated_at: Utc::now(),
        }
    }
}

/// An outgoing neighbour of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub relation: Relation,
    pub entity: Entity,
}

/// One node reached by a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalNode {
    pub entity: Entity,
    /// Hops from the start entity (>= 1).
    pub depth: usize,
    pub relation_type: String,
    pub weight: f64,
    /// The entity this node was reached from.
    pub via: String,
}

#[async_trait]
pub trait ConceptualMemory: Send + Sync {
    async fn add_entity(&self, entity: Entity) -> MemoryResult<String>;

    async fn get_entity(&self, id: &str) -> MemoryResult<Option<Entity>>;

    /// Case-insensitive exact name lookup.
    async fn find_entity(&self, name: &str) -> MemoryResult<Option<Entity>>;

    /// Entities whose name appears in `text`, most mentioned first.
    async fn match_entities(&self, text: &str, limit: usize) -> MemoryResult<Vec<Entity>>;

    /// Insert or update an edge. Idempotent on `(source, target, type)`; the
    /// latest weight wins.
    async fn add_relation(&self, relation: Relation) -> MemoryResult<()>;

    /// Direct outgoing neighbours, heaviest edge first.
    async fn get_related(&self, entity_id: &str) -> MemoryResult<Vec<RelatedEntity>>;

    /// Breadth-first expansion up to `max_depth` hops. Each entity appears at
    /// most once; results come out in non-decreasing depth order.
    async fn traverse(&self, entity_id: &str, max_depth: usize) -> MemoryResult<Vec<TraversalNode>>;

    /// Returns the new mention count.
    async fn increment_mentions(&self, entity_id: &str) -> MemoryResult<u64>;

    /// Number of relations touching `entity_id`, in either direction.
    async fn degree(&self, entity_id: &str) -> MemoryResult<usize>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Meta memory ───────────────────────────────────────────────────────────

/// Which memories a query matched, and from where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPattern {
    pub query: String,
    pub memory_ids: Vec<String>,
    pub user_id: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessPattern {
    pub fn new(
        query: impl Into<String>,
        memory_ids: Vec<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            memory_ids,
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A frequently matched memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotMemory {
    pub memory_id: String,
    pub access_count: u64,
    /// Distinct channels that referenced it.
    pub channel_count: usize,
    pub last_accessed: DateTime<Utc>,
}

#[async_trait]
pub trait MetaMemory: Send + Sync {
    async fn record_access(&self, pattern: AccessPattern) -> MemoryResult<()>;

    /// Ranked by access count, descending.
    async fn get_hot_memories(&self, limit: usize) -> MemoryResult<Vec<HotMemory>>;

    /// Memory IDs recently matched for this user on this channel, newest first.
    async fn get_prefetch_candidates(
        &self,
        user_id: &str,
        channel_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<String>>;

    /// Drop patterns older than `days`. Returns how many were removed.
    async fn prune_old_patterns(&self, days: u32) -> MemoryResult<usize>;

    async fn health_check(&self) -> MemoryResult<ComponentHealth> {
        Ok(ComponentHealth::healthy())
    }
}

// ── Embeddings ────────────────────────────────────────────────────────────

/// Turns text into a fixed-size vector for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;
}

/// The six layers, shared by the assembler, the orchestrator and maintenance.
#[derive(Clone)]
pub struct MemoryLayers {
    pub stream: Arc<dyn StreamBuffer>,
    pub working: Arc<dyn WorkingMemory>,
    pub episodic: Arc<dyn EpisodicMemory>,
    pub semantic: Arc<dyn SemanticMemory>,
    pub conceptual: Arc<dyn ConceptualMemory>,
    pub meta: Arc<dyn MetaMemory>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_starts_undecayed() {
        let m = Memory::new("u1", "likes tea", MemoryType::Preference, 0.8, "cli");
        assert_eq!(m.decayed_importance, 0.8);
        assert_eq!(m.channel_count(), 1);
        assert_eq!(m.channel_mentions["cli"], 1);
    }

    #[test]
    fn importance_is_clamped() {
        let m = Memory::new("u1", "x", MemoryType::Fact, 1.7, "cli");
        assert_eq!(m.importance, 1.0);
    }

    #[test]
    fn memory_type_parses_loosely() {
        assert_eq!(MemoryType::parse(" Fact "), Some(MemoryType::Fact));
        assert_eq!(MemoryType::parse("insight"), Some(MemoryType::Insight));
        assert_eq!(MemoryType::parse("opinion"), None);
    }

    #[test]
    fn decay_multipliers_order_fact_slowest() {
        let cfg = DecayConfig::default();
        assert!(cfg.type_multiplier(MemoryType::Fact) < cfg.type_multiplier(MemoryType::Preference));
        assert!(
            cfg.type_multiplier(MemoryType::Insight) < cfg.type_multiplier(MemoryType::Conversation)
        );
    }

    #[test]
    fn semantic_query_builder() {
        let q = SemanticQuery::new("rust").for_user("u1").limit(3);
        assert_eq!(q.limit, 3);
        assert_eq!(q.user_id.as_deref(), Some("u1"));
        assert!(q.memory_types.is_empty());
    }
}
