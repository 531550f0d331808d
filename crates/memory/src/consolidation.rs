//! Consolidation engine — turns ended conversations into long-term memories.
//!
//! Pipeline per session:
//!   1. Render the transcript and ask the provider for a JSON array of
//!      `{content, type, importance}` items.
//!   2. For each item, search semantic memory; if the best hit scores at or
//!      above the dedup threshold, reinforce it (access count + channel
//!      mention) instead of inserting a near-duplicate.
//!   3. Mark the session consolidated.
//!
//! A failure on one session is logged and the batch moves on. The session
//! goes to the back of the queue and is retried on later runs until it has
//! failed `max_attempts` times, after which it is left out for good.

use mnemo_core::error::{Error, MemoryError};
use mnemo_core::memory::{
    EpisodicMemory, EpisodicSession, Memory, MemoryType, SemanticMemory, SemanticQuery,
};
use mnemo_core::message::Message;
use mnemo_core::provider::{ChatParams, LlmProvider, collect_response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Max transcript characters sent for extraction.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

const EXTRACTION_PROMPT: &str = "You extract durable knowledge about the user from a conversation. \
Respond with ONLY a JSON array. Each element is an object with fields: \
\"content\" (one self-contained sentence), \
\"type\" (one of \"fact\", \"preference\", \"insight\"), \
\"importance\" (number between 0 and 1). \
Return [] if nothing is worth remembering.";

/// One item the model extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

/// What one consolidation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub sessions_processed: usize,
    pub sessions_failed: usize,
    /// Sessions that reached the attempt limit during this run.
    pub sessions_abandoned: usize,
    pub memories_created: usize,
    pub memories_deduplicated: usize,
}

pub struct ConsolidationEngine {
    provider: Arc<dyn LlmProvider>,
    model: String,
    episodic: Arc<dyn EpisodicMemory>,
    semantic: Arc<dyn SemanticMemory>,
    dedup_threshold: f64,
    batch_size: usize,
    max_attempts: u32,
}

impl ConsolidationEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        episodic: Arc<dyn EpisodicMemory>,
        semantic: Arc<dyn SemanticMemory>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            episodic,
            semantic,
            dedup_threshold: 0.85,
            batch_size: 10,
            max_attempts: 3,
        }
    }

    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Process one batch of unconsolidated sessions.
    pub async fn run(&self) -> Result<ConsolidationReport, Error> {
        let pending = self
            .episodic
            .get_unconsolidated(self.batch_size, self.max_attempts)
            .await?;
        let mut report = ConsolidationReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        info!(sessions = pending.len(), "Consolidating ended sessions");

        for session in pending {
            match self.consolidate_session(&session).await {
                Ok((created, deduped)) => {
                    report.sessions_processed += 1;
                    report.memories_created += created;
                    report.memories_deduplicated += deduped;
                }
                Err(e) => {
                    report.sessions_failed += 1;
                    let failures = match self
                        .episodic
                        .record_consolidation_failure(&session.session_id)
                        .await
                    {
                        Ok(n) => n,
                        Err(record_err) => {
                            warn!(session_id = %session.session_id, error = %record_err, "Could not record consolidation failure");
                            continue;
                        }
                    };
                    if failures >= self.max_attempts {
                        warn!(session_id = %session.session_id, failures, error = %e, "Consolidation failed, giving up on session");
                        report.sessions_abandoned += 1;
                    } else {
                        warn!(session_id = %session.session_id, failures, error = %e, "Consolidation failed, will retry");
                    }
                }
            }
        }

        info!(
            processed = report.sessions_processed,
            failed = report.sessions_failed,
            abandoned = report.sessions_abandoned,
            created = report.memories_created,
            deduplicated = report.memories_deduplicated,
            "Consolidation run complete"
        );
        Ok(report)
    }

    async fn consolidate_session(&self, session: &EpisodicSession) -> Result<(usize, usize), Error> {
        let transcript = render_transcript(session);
        if transcript.trim().is_empty() {
            self.episodic.mark_consolidated(&session.session_id).await?;
            return Ok((0, 0));
        }

        let mut params = ChatParams::new(&self.model, EXTRACTION_PROMPT);
        params.temperature = 0.0;
        params.messages.push(Message::user(transcript));
        let rx = self.provider.chat(params).await?;
        let response = collect_response(rx).await?;
        let items = parse_extraction(&response.text)?;

        let channel = session
            .channels
            .first()
            .cloned()
            .unwrap_or_else(|| "unknown".into());
        let mut created = 0;
        let mut deduped = 0;

        for item in items {
            let Some(memory_type) = MemoryType::parse(&item.memory_type) else {
                debug!(kind = %item.memory_type, "Skipping extracted item with unknown type");
                continue;
            };
            if item.content.trim().is_empty() {
                continue;
            }

            let query = SemanticQuery::new(&item.content)
                .for_user(&session.user_id)
                .limit(1);
            let best = self.semantic.search(&query).await?.into_iter().next();
            match best {
                Some(hit) if hit.final_score >= self.dedup_threshold => {
                    self.semantic.record_access(&hit.memory.id, &channel).await?;
                    deduped += 1;
                }
                _ => {
                    let memory = Memory::new(
                        &session.user_id,
                        item.content.trim(),
                        memory_type,
                        item.importance,
                        &channel,
                    )
                    .with_session(&session.session_id);
                    self.semantic.store(memory).await?;
                    created += 1;
                }
            }
        }

        self.episodic.mark_consolidated(&session.session_id).await?;
        Ok((created, deduped))
    }
}

fn render_transcript(session: &EpisodicSession) -> String {
    let mut out = String::new();
    if let Some(summary) = &session.summary {
        out.push_str(&format!("Session summary: {summary}\n\n"));
    }
    for m in &session.messages {
        out.push_str(&format!("[{}] {}: {}\n", m.channel_id, m.role.as_str(), m.content));
    }
    if out.chars().count() > MAX_TRANSCRIPT_CHARS {
        out = out.chars().take(MAX_TRANSCRIPT_CHARS).collect();
    }
    out
}

/// Pull the JSON array out of a model reply, tolerating prose or code fences around it.
pub fn parse_extraction(text: &str) -> Result<Vec<ExtractedMemory>, MemoryError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(MemoryError::QueryFailed(
            "extraction reply contained no JSON array".into(),
        ));
    };
    if end < start {
        return Err(MemoryError::QueryFailed(
            "extraction reply contained no JSON array".into(),
        ));
    }
    serde_json::from_str(&text[start..=end])
        .map_err(|e| MemoryError::QueryFailed(format!("invalid extraction JSON: {e}")))
}
