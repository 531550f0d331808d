//! Context assembly — one token-budgeted prompt from the memory hierarchy.
//!
//! Every turn's prompt is packed into eight fixed budget slots:
//!
//! 1. **System prompt** — base instructions
//! 2. **Stream buffer** — recent raw events for the user, newest kept first
//! 3. **Working memory** — the current conversation's turns, newest kept first
//! 4. **Semantic search** — hybrid-scored long-term memories, best first
//! 5. **Graph traversal** — relations around entities named in the query
//! 6. **Session archive** — summaries of the user's previous sessions
//! 7. **Meta memory** — memories this user recently needed on this channel
//! 8. **Tool definitions** — what the model may call
//!
//! Packing is greedy per slot and uses only the cheap token estimate: a slot
//! takes candidates in order until the next one would overflow it. The first
//! candidate of an empty slot is truncated to fit rather than dropped. A
//! failing memory layer contributes nothing and is logged; assembly itself
//! never fails.

use crate::context::token::{HeuristicCounter, TokenCounter};
use mnemo_config::{BudgetSlot, ContextConfig};
use mnemo_core::memory::{AccessPattern, MemoryLayers, SemanticQuery};
use mnemo_core::message::Message;
use mnemo_core::provider::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// Who and what a prompt is being assembled for.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyRequest<'a> {
    pub user_id: &'a str,
    pub channel_id: &'a str,
    /// Excluded from the session archive.
    pub session_id: Option<&'a str>,
    /// The user's input for this turn; drives retrieval.
    pub query: &'a str,
}

/// One accepted chunk of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub name: String,
    pub content: String,
    /// Estimated tokens.
    pub tokens: usize,
    /// Memory layer (or "system"/"tools") the chunk came from.
    pub source: String,
    pub slot: BudgetSlot,
}

/// How full one slot ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub slot: BudgetSlot,
    pub used: usize,
    pub allocated: usize,
}

impl SlotUsage {
    /// `used / allocated`, in [0, 1].
    pub fn ratio(&self) -> f64 {
        if self.allocated == 0 {
            0.0
        } else {
            self.used as f64 / self.allocated as f64
        }
    }
}

/// The assembled context, ready for a provider call.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Base instructions plus every memory section, rendered.
    pub system_prompt: String,
    pub sections: Vec<ContextSection>,
    /// Tool definitions that fit the tool slot.
    pub tools: Vec<ToolDefinition>,
    /// Sum of every section's tokens, system prompt included.
    pub total_tokens: usize,
    /// One entry per slot, in slot order.
    pub budget_utilization: Vec<SlotUsage>,
}

impl AssembledContext {
    pub fn sections_in(&self, slot: BudgetSlot) -> impl Iterator<Item = &ContextSection> {
        self.sections.iter().filter(move |s| s.slot == slot)
    }

    pub fn usage(&self, slot: BudgetSlot) -> Option<SlotUsage> {
        self.budget_utilization.iter().copied().find(|u| u.slot == slot)
    }
}

/// Outcome of the accurate pre-flight count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub tokens: usize,
    pub limit: usize,
}

impl PreflightReport {
    pub fn within_limit(&self) -> bool {
        self.tokens <= self.limit
    }
}

struct Candidate {
    name: String,
    content: String,
    source: &'static str,
}

impl Candidate {
    fn new(name: impl Into<String>, content: impl Into<String>, source: &'static str) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            source,
        }
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

pub struct ContextAssembler {
    layers: MemoryLayers,
    config: ContextConfig,
    counter: Arc<dyn TokenCounter>,
}

impl ContextAssembler {
    pub fn new(layers: MemoryLayers, config: ContextConfig) -> Self {
        Self {
            layers,
            config,
            counter: Arc::new(HeuristicCounter),
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assemble the prompt for one turn.
    pub async fn assemble(
        &self,
        request: AssemblyRequest<'_>,
        tool_definitions: &[ToolDefinition],
    ) -> AssembledContext {
        let mut sections = Vec::new();
        let mut utilization = Vec::with_capacity(BudgetSlot::ALL.len());

        // ── Slot 1: System prompt ─────────────────────────────────────────
        let system = vec![Candidate::new(
            "instructions",
            self.config.system_prompt.clone(),
            "system",
        )];
        self.pack(BudgetSlot::SystemPrompt, system, &mut sections, &mut utilization);

        // ── Slot 2: Stream buffer ─────────────────────────────────────────
        let mut stream = self.stream_candidates(&request).await;
        stream.reverse();
        let start = sections.len();
        self.pack(BudgetSlot::StreamBuffer, stream, &mut sections, &mut utilization);
        sections[start..].reverse();

        // ── Slot 3: Working memory ────────────────────────────────────────
        let mut turns = self.working_candidates(&request).await;
        turns.reverse();
        let start = sections.len();
        self.pack(BudgetSlot::WorkingMemory, turns, &mut sections, &mut utilization);
        sections[start..].reverse();

        // ── Slot 4: Semantic search ───────────────────────────────────────
        let semantic = self.semantic_candidates(&request).await;
        let start = sections.len();
        self.pack(BudgetSlot::SemanticSearch, semantic, &mut sections, &mut utilization);
        let accepted: Vec<String> = sections[start..]
            .iter()
            .filter_map(|s| s.name.strip_prefix("memory:").map(String::from))
            .collect();
        self.record_matches(&request, &accepted).await;

        // ── Slot 5: Graph traversal ───────────────────────────────────────
        let graph = self.graph_candidates(&request).await;
        self.pack(BudgetSlot::GraphTraversal, graph, &mut sections, &mut utilization);

        // ── Slot 6: Session archive ───────────────────────────────────────
        let archive = self.archive_candidates(&request).await;
        self.pack(BudgetSlot::SessionArchive, archive, &mut sections, &mut utilization);

        // ── Slot 7: Meta memory ───────────────────────────────────────────
        let seen: HashSet<&str> = accepted.iter().map(String::as_str).collect();
        let meta = self.meta_candidates(&request, &seen).await;
        self.pack(BudgetSlot::MetaMemory, meta, &mut sections, &mut utilization);

        // ── Slot 8: Tool definitions ──────────────────────────────────────
        let tool_candidates = tool_definitions
            .iter()
            .map(|def| {
                let json = serde_json::to_string(def).unwrap_or_default();
                Candidate::new(format!("tool:{}", def.name), json, "tools")
            })
            .collect();
        let start = sections.len();
        self.pack(
            BudgetSlot::ToolDefinitions,
            tool_candidates,
            &mut sections,
            &mut utilization,
        );
        let tools = tool_definitions
            .iter()
            .filter(|def| {
                sections[start..]
                    .iter()
                    .any(|s| s.name.strip_prefix("tool:") == Some(def.name.as_str()))
            })
            .cloned()
            .collect();

        let total_tokens = sections.iter().map(|s| s.tokens).sum();
        let system_prompt = render(&sections);

        debug!(
            user_id = %request.user_id,
            sections = sections.len(),
            total_tokens,
            "Context assembled"
        );

        AssembledContext {
            system_prompt,
            sections,
            tools,
            total_tokens,
            budget_utilization: utilization,
        }
    }

    /// Accurate count of a prompt plus its messages against `max_context_tokens`.
    pub async fn preflight(&self, context: &AssembledContext, messages: &[Message]) -> PreflightReport {
        let mut text = context.system_prompt.clone();
        for m in messages {
            text.push('\n');
            text.push_str(&m.content);
        }
        for t in &context.tools {
            text.push('\n');
            text.push_str(&serde_json::to_string(t).unwrap_or_default());
        }

        let tokens = match self.counter.count(&text).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Pre-flight count failed, using estimate");
                self.counter.estimate(&text)
            }
        };
        let report = PreflightReport {
            tokens,
            limit: self.config.max_context_tokens,
        };
        if !report.within_limit() {
            warn!(
                tokens,
                limit = report.limit,
                "Assembled context exceeds the model context limit"
            );
        }
        report
    }

    // ── Packing ───────────────────────────────────────────────────────────

    fn pack(
        &self,
        slot: BudgetSlot,
        candidates: Vec<Candidate>,
        sections: &mut Vec<ContextSection>,
        utilization: &mut Vec<SlotUsage>,
    ) {
        let allocated = self.config.budget.get(slot);
        let mut used = 0;
        let mut accepted = 0;

        for candidate in candidates {
            if candidate.content.trim().is_empty() {
                continue;
            }
            let tokens = self.counter.estimate(&candidate.content);
            if used + tokens <= allocated {
                used += tokens;
                accepted += 1;
                sections.push(section(candidate, tokens, slot));
                continue;
            }
            if accepted == 0 {
                let content = truncate_to_tokens(&candidate.content, allocated);
                let tokens = self.counter.estimate(&content);
                if !content.is_empty() && tokens <= allocated {
                    used += tokens;
                    sections.push(section(Candidate { content, ..candidate }, tokens, slot));
                }
            }
            break;
        }

        utilization.push(SlotUsage {
            slot,
            used,
            allocated,
        });
    }

    // ── Candidate sources ─────────────────────────────────────────────────

    async fn stream_candidates(&self, request: &AssemblyRequest<'_>) -> Vec<Candidate> {
        match self
            .layers
            .stream
            .recent(request.user_id, self.config.stream_events)
            .await
        {
            Ok(events) => events
                .into_iter()
                .map(|e| {
                    let content = format!("[{}] {}: {}", e.channel_id, e.event_type, e.content);
                    Candidate::new(format!("event:{}", e.id), content, "stream")
                })
                .collect(),
            Err(e) => {
                warn!(layer = "stream", error = %e, "Memory layer unavailable");
                Vec::new()
            }
        }
    }

    async fn working_candidates(&self, request: &AssemblyRequest<'_>) -> Vec<Candidate> {
        match self.layers.working.get_turns(request.user_id).await {
            Ok(turns) => turns
                .into_iter()
                .enumerate()
                .map(|(i, t)| {
                    let content = format!("{} ({}): {}", t.role.as_str(), t.channel_id, t.content);
                    Candidate::new(format!("turn:{i}"), content, "working")
                })
                .collect(),
            Err(e) => {
                warn!(layer = "working", error = %e, "Memory layer unavailable");
                Vec::new()
            }
        }
    }

    async fn semantic_candidates(&self, request: &AssemblyRequest<'_>) -> Vec<Candidate> {
        if request.query.trim().is_empty() {
            return Vec::new();
        }
        let query = SemanticQuery::new(request.query)
            .for_user(request.user_id)
            .limit(self.config.semantic_limit);
        match self.layers.semantic.search(&query).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| {
                    let m = hit.memory;
                    let content = format!("[{}] {}", m.memory_type, m.content);
                    Candidate::new(format!("memory:{}", m.id), content, "semantic")
                })
                .collect(),
            Err(e) => {
                warn!(layer = "semantic", error = %e, "Memory layer unavailable");
                Vec::new()
            }
        }
    }

    async fn record_matches(&self, request: &AssemblyRequest<'_>, memory_ids: &[String]) {
        if memory_ids.is_empty() {
            return;
        }
        let pattern = AccessPattern::new(
            request.query,
            memory_ids.to_vec(),
            request.user_id,
            request.channel_id,
        );
        if let Err(e) = self.layers.meta.record_access(pattern).await {
            warn!(layer = "meta", error = %e, "Failed to record access pattern");
        }
        for id in memory_ids {
            if let Err(e) = self.layers.semantic.record_access(id, request.channel_id).await {
                warn!(layer = "semantic", memory_id = %id, error = %e, "Failed to record memory access");
            }
        }
    }

    async fn graph_candidates(&self, request: &AssemblyRequest<'_>) -> Vec<Candidate> {
        let conceptual = &self.layers.conceptual;
        let roots = match conceptual.match_entities(request.query, 5).await {
            Ok(roots) => roots,
            Err(e) => {
                warn!(layer = "conceptual", error = %e, "Memory layer unavailable");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        for root in roots {
            let nodes = match conceptual.traverse(&root.id, self.config.graph_depth).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(layer = "conceptual", entity = %root.name, error = %e, "Traversal failed");
                    continue;
                }
            };
            let mut names: HashMap<&str, &str> = HashMap::new();
            names.insert(&root.id, &root.name);
            for node in &nodes {
                names.insert(&node.entity.id, &node.entity.name);
            }
            for node in &nodes {
                let from = names.get(node.via.as_str()).copied().unwrap_or("?");
                let line = format!(
                    "{} --{}--> {} ({})",
                    from, node.relation_type, node.entity.name, node.entity.entity_type
                );
                if seen.insert(line.clone()) {
                    candidates.push(Candidate::new(
                        format!("relation:{}", node.entity.id),
                        line,
                        "conceptual",
                    ));
                }
            }
        }
        candidates
    }

    async fn archive_candidates(&self, request: &AssemblyRequest<'_>) -> Vec<Candidate> {
        // One extra in case the current session is among the most recent.
        let limit = self.config.archive_sessions + 1;
        match self
            .layers
            .episodic
            .get_recent_sessions(request.user_id, limit)
            .await
        {
            Ok(sessions) => sessions
                .into_iter()
                .filter(|s| s.is_ended() && Some(s.session_id.as_str()) != request.session_id)
                .filter_map(|s| {
                    let summary = s.summary?;
                    let content = format!(
                        "{} via {}: {}",
                        s.started_at.format("%Y-%m-%d"),
                        s.channels.join(", "),
                        summary
                    );
                    Some(Candidate::new(format!("session:{}", s.session_id), content, "episodic"))
                })
                .take(self.config.archive_sessions)
                .collect(),
            Err(e) => {
                warn!(layer = "episodic", error = %e, "Memory layer unavailable");
                Vec::new()
            }
        }
    }

    async fn meta_candidates(
        &self,
        request: &AssemblyRequest<'_>,
        already_included: &HashSet<&str>,
    ) -> Vec<Candidate> {
        let ids = match self
            .layers
            .meta
            .get_prefetch_candidates(request.user_id, request.channel_id, self.config.hot_memories)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(layer = "meta", error = %e, "Memory layer unavailable");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for id in ids {
            if already_included.contains(id.as_str()) {
                continue;
            }
            match self.layers.semantic.get(&id).await {
                Ok(Some(m)) if m.user_id == request.user_id => {
                    let content = format!("[{}] {}", m.memory_type, m.content);
                    candidates.push(Candidate::new(format!("memory:{id}"), content, "meta"));
                }
                Ok(_) => {}
                Err(e) => warn!(layer = "semantic", memory_id = %id, error = %e, "Prefetch lookup failed"),
            }
        }
        candidates
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn section(candidate: Candidate, tokens: usize, slot: BudgetSlot) -> ContextSection {
    ContextSection {
        name: candidate.name,
        content: candidate.content,
        tokens,
        source: candidate.source.to_string(),
        slot,
    }
}

/// Cut `text` so its estimate is at most `tokens`, marking the cut with `…`.
fn truncate_to_tokens(text: &str, tokens: usize) -> String {
    let max_chars = tokens * 3;
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

fn heading(slot: BudgetSlot) -> Option<&'static str> {
    match slot {
        BudgetSlot::SystemPrompt | BudgetSlot::ToolDefinitions => None,
        BudgetSlot::StreamBuffer => Some("Recent activity"),
        BudgetSlot::WorkingMemory => Some("Conversation so far"),
        BudgetSlot::SemanticSearch => Some("Relevant memories"),
        BudgetSlot::GraphTraversal => Some("Known relationships"),
        BudgetSlot::SessionArchive => Some("Previous sessions"),
        BudgetSlot::MetaMemory => Some("Often needed here"),
    }
}

/// Render sections into prompt text, one block per slot.
fn render(sections: &[ContextSection]) -> String {
    let mut out = String::new();
    for s in sections.iter().filter(|s| s.slot == BudgetSlot::SystemPrompt) {
        out.push_str(&s.content);
    }
    for slot in BudgetSlot::ALL {
        let Some(title) = heading(slot) else {
            continue;
        };
        let mut block = sections.iter().filter(|s| s.slot == slot).peekable();
        if block.peek().is_none() {
            continue;
        }
        let _ = write!(out, "\n\n## {title}");
        for s in block {
            let _ = write!(out, "\n- {}", s.content);
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────
