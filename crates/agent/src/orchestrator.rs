//! The engine's outer surface: sessions and turns.
//!
//! Channels talk to the engine through four calls:
//!
//! - [`Orchestrator::start_session`] resolves the user's open session (or
//!   opens one), noting channel switches and what was said before.
//! - [`Orchestrator::run_turn`] assembles context, runs the ReAct loop on a
//!   background task and hands back its event stream.
//! - [`Orchestrator::end_session`] summarizes the conversation and files it
//!   in episodic memory.
//! - [`Orchestrator::health_check`] reports every layer, the provider chain
//!   and the session store.

use chrono::{DateTime, Utc};
use mnemo_config::{AppConfig, TokenCacheConfig};
use mnemo_core::error::{Error, SessionError};
use mnemo_core::health::{self, ComponentHealth, HealthStatus};
use mnemo_core::memory::{EpisodicMessage, EpisodicSession, MemoryLayers, StreamEvent, Turn};
use mnemo_core::message::{Message, Role};
use mnemo_core::provider::{ChatParams, LlmProvider, collect_response};
use mnemo_core::session::{SessionState, SessionStore, UnifiedSession};
use mnemo_core::tool::{ToolExecutor, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{AssemblyRequest, CachedTokenCounter, ContextAssembler, TokenCounter};
use crate::react::{ReactLoop, TurnInput, TurnOutcome, TurnStream};
use crate::session_store::InMemorySessionStore;

const EVENT_BUFFER: usize = 256;
const TOPIC_LIMIT: usize = 5;

const SUMMARY_PROMPT: &str = "Summarize the following conversation in two or three sentences. \
Keep names, decisions, preferences and open questions. Reply with the summary only.";

/// A session ready to take turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSession {
    pub session: UnifiedSession,
    /// An open session was picked up rather than a new one created.
    pub resumed: bool,
    /// The user arrived on a different channel than last time.
    pub channel_switched: bool,
    /// What was discussed before, when the user changed channel.
    pub previous_summary: Option<String>,
}

/// The record of an ended session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub turn_count: u32,
    pub channels: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Drives sessions and turns over the memory hierarchy and a provider.
#[derive(Clone)]
pub struct Orchestrator {
    layers: MemoryLayers,
    sessions: Arc<dyn SessionStore>,
    provider: Arc<dyn LlmProvider>,
    assembler: Arc<ContextAssembler>,
    react: Arc<ReactLoop>,
    tools: ToolRegistry,
    token_cache: TokenCacheConfig,
    model: String,
    summarize_with_llm: bool,
}

impl Orchestrator {
    /// Build an orchestrator from configuration with an in-memory session store.
    pub fn from_config(
        config: &AppConfig,
        layers: MemoryLayers,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self::with_store(config, layers, provider, Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_store(
        config: &AppConfig,
        layers: MemoryLayers,
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let react = ReactLoop::new(provider.clone(), sessions.clone(), &config.default_model)
            .with_config(config.agent.clone())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens);
        Self {
            assembler: Arc::new(ContextAssembler::new(layers.clone(), config.context.clone())),
            layers,
            sessions,
            provider,
            react: Arc::new(react),
            tools: ToolRegistry::new(),
            token_cache: config.token_cache.clone(),
            model: config.default_model.clone(),
            summarize_with_llm: config.agent.summarize_with_llm,
        }
    }

    /// Extra tools offered on every turn, next to the memory tools.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Use an accurate counter for pre-flight checks, behind the configured cache.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        let cached = CachedTokenCounter::from_config(counter, &self.token_cache);
        let assembler = ContextAssembler::new(self.layers.clone(), self.assembler.config().clone())
            .with_counter(Arc::new(cached));
        self.assembler = Arc::new(assembler);
        self
    }

    pub fn layers(&self) -> &MemoryLayers {
        &self.layers
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        self.provider.clone()
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }

    // ── start_session ─────────────────────────────────────────────────────

    pub async fn start_session(&self, user_id: &str, channel_id: &str) -> Result<ResolvedSession, Error> {
        if user_id.trim().is_empty() || channel_id.trim().is_empty() {
            return Err(Error::Validation("user_id and channel_id must not be empty".into()));
        }

        if let Some(open) = self.sessions.find_open_for_user(user_id).await?
            && let Some((session, switched)) =
                self.sessions.switch_channel(&open.session_id, channel_id).await?
        {
            let previous_summary = if switched {
                self.push_event(StreamEvent::new("channel_switch", user_id, channel_id, "")
                    .with_session(&session.session_id))
                    .await;
                self.layers.working.compress(user_id).await.unwrap_or_else(|e| {
                    warn!(user_id = %user_id, error = %e, "Working memory unavailable");
                    None
                })
            } else {
                None
            };
            info!(
                session_id = %session.session_id,
                user_id = %user_id,
                channel = %channel_id,
                switched,
                "Session resumed"
            );
            return Ok(ResolvedSession {
                session,
                resumed: true,
                channel_switched: switched,
                previous_summary,
            });
        }

        let previous = self.previous_session_elsewhere(user_id, channel_id).await;

        let session = UnifiedSession::new(user_id, channel_id);
        let id = session.session_id.clone();
        self.sessions.create(session).await?;
        if let Err(e) = self
            .layers
            .episodic
            .create_session(EpisodicSession::new(&id, user_id, channel_id))
            .await
        {
            warn!(session_id = %id, error = %e, "Failed to open episodic session");
        }
        let session = self
            .sessions
            .transition(&id, SessionState::Initializing, SessionState::Active)
            .await?;
        self.push_event(StreamEvent::new("session_start", user_id, channel_id, "").with_session(&id))
            .await;

        info!(session_id = %id, user_id = %user_id, channel = %channel_id, "Session started");
        Ok(ResolvedSession {
            session,
            resumed: false,
            channel_switched: previous.is_some(),
            previous_summary: previous,
        })
    }

    /// Summary of the user's latest ended session if it happened on another channel.
    async fn previous_session_elsewhere(&self, user_id: &str, channel_id: &str) -> Option<String> {
        let recent = match self.layers.episodic.get_recent_sessions(user_id, 5).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Episodic memory unavailable");
                return None;
            }
        };
        let last = recent.into_iter().find(|s| s.is_ended() && s.summary.is_some())?;
        if last.channels.iter().all(|c| c == channel_id) {
            return None;
        }
        last.summary
    }

    // ── run_turn ──────────────────────────────────────────────────────────

    pub async fn run_turn(&self, session_id: &str, input: &str) -> Result<TurnStream, Error> {
        if input.trim().is_empty() {
            return Err(Error::Validation("input must not be empty".into()));
        }
        let session = self.get_session(session_id).await?;
        if session.state.is_busy() {
            return Err(SessionError::Busy(session_id.to_string()).into());
        }

        let user_id = session.user_id.clone();
        let channel_id = session.active_channel_id.clone();
        let registry = mnemo_tools::memory_registry(&self.tools, &self.layers, &user_id, &channel_id);

        let context = self
            .assembler
            .assemble(
                AssemblyRequest {
                    user_id: &user_id,
                    channel_id: &channel_id,
                    session_id: Some(session_id),
                    query: input,
                },
                &registry.definitions(),
            )
            .await;
        let messages = vec![Message::user(input)];
        self.assembler.preflight(&context, &messages).await;

        self.react.begin(session_id).await?;

        self.record_message(&session, Role::User, input).await;

        let (stream, sink) = TurnStream::channel(EVENT_BUFFER);
        let turn = TurnInput {
            session_id: session_id.to_string(),
            system_prompt: context.system_prompt,
            tools: context.tools,
            messages,
            executor: Arc::new(registry),
        };

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.react.run(turn, &sink).await;
            this.record_outcome(&session, &outcome).await;
            this.react.complete(&outcome, &sink).await;
        });

        Ok(stream)
    }

    async fn record_outcome(&self, session: &UnifiedSession, outcome: &TurnOutcome) {
        if outcome.answer.trim().is_empty() {
            return;
        }
        self.record_message(session, Role::Assistant, &outcome.answer).await;
    }

    /// Write one side of the exchange to the stream buffer, working and episodic memory.
    async fn record_message(&self, session: &UnifiedSession, role: Role, content: &str) {
        let user_id = &session.user_id;
        let channel_id = &session.active_channel_id;
        let event_type = match role {
            Role::User => "user_message",
            _ => "assistant_message",
        };

        self.push_event(
            StreamEvent::new(event_type, user_id, channel_id, content).with_session(&session.session_id),
        )
        .await;

        if let Err(e) = self
            .layers
            .working
            .add_turn(user_id, Turn::new(role, content, channel_id))
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to add working memory turn");
        }

        let message = EpisodicMessage {
            role,
            content: content.to_string(),
            channel_id: channel_id.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .layers
            .episodic
            .add_message(&session.session_id, message)
            .await
        {
            warn!(session_id = %session.session_id, error = %e, "Failed to record episodic message");
        }
    }

    // ── end_session ───────────────────────────────────────────────────────

    pub async fn end_session(&self, session_id: &str) -> Result<SessionSummary, Error> {
        let session = self.get_session(session_id).await?;
        if session.state.is_busy() {
            return Err(SessionError::Busy(session_id.to_string()).into());
        }
        self.sessions
            .transition(session_id, SessionState::Active, SessionState::Summarizing)
            .await?;

        let user_id = &session.user_id;
        let turns = self.layers.working.get_turns(user_id).await.unwrap_or_else(|e| {
            warn!(user_id = %user_id, error = %e, "Working memory unavailable");
            Vec::new()
        });
        let transcript = turns
            .iter()
            .map(|t| format!("{} ({}): {}", t.role.as_str(), t.channel_id, t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = self.summarize(user_id, &transcript).await;
        let topics = self.topics(&transcript).await;

        self.sessions
            .transition(session_id, SessionState::Summarizing, SessionState::Ending)
            .await?;

        if let Err(e) = self
            .layers
            .episodic
            .end_session(session_id, summary.clone(), topics.clone())
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to persist session summary");
        }
        if let Err(e) = self.layers.working.clear(user_id).await {
            warn!(user_id = %user_id, error = %e, "Failed to clear working memory");
        }
        self.push_event(
            StreamEvent::new("session_end", user_id, &session.active_channel_id, &summary)
                .with_session(session_id),
        )
        .await;

        let ended = self
            .sessions
            .transition(session_id, SessionState::Ending, SessionState::Ended)
            .await?;

        info!(session_id = %session_id, turns = ended.turn_count, topics = topics.len(), "Session ended");
        Ok(SessionSummary {
            session_id: ended.session_id,
            user_id: ended.user_id,
            summary,
            topics,
            turn_count: ended.turn_count,
            channels: ended.channel_history,
            started_at: ended.started_at,
            ended_at: ended.last_activity_at,
        })
    }

    async fn summarize(&self, user_id: &str, transcript: &str) -> String {
        if transcript.is_empty() {
            return "No messages were exchanged.".into();
        }
        if self.summarize_with_llm {
            match self.llm_summary(transcript).await {
                Ok(summary) if !summary.trim().is_empty() => return summary.trim().to_string(),
                Ok(_) => warn!(user_id = %user_id, "Provider returned an empty summary"),
                Err(e) => warn!(user_id = %user_id, error = %e, "LLM summary failed, compressing instead"),
            }
        }
        match self.layers.working.compress(user_id).await {
            Ok(Some(summary)) => summary,
            Ok(None) => "No messages were exchanged.".into(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Working memory compression failed");
                transcript.chars().take(500).collect()
            }
        }
    }

    async fn llm_summary(&self, transcript: &str) -> Result<String, Error> {
        let mut params = ChatParams::new(&self.model, SUMMARY_PROMPT);
        params.messages = vec![Message::user(transcript)];
        params.temperature = 0.2;
        let rx = self.provider.chat(params).await?;
        Ok(collect_response(rx).await?.text)
    }

    /// Known entities mentioned in the conversation.
    async fn topics(&self, transcript: &str) -> Vec<String> {
        match self.layers.conceptual.match_entities(transcript, TOPIC_LIMIT).await {
            Ok(entities) => entities.into_iter().map(|e| e.name).collect(),
            Err(e) => {
                debug!(error = %e, "Topic extraction skipped");
                Vec::new()
            }
        }
    }

    // ── health_check ──────────────────────────────────────────────────────

    pub async fn health_check(&self) -> HealthStatus {
        let l = &self.layers;
        let (stream, working, episodic, semantic, conceptual, meta, provider, store) = tokio::join!(
            l.stream.health_check(),
            l.working.health_check(),
            l.episodic.health_check(),
            l.semantic.health_check(),
            l.conceptual.health_check(),
            l.meta.health_check(),
            self.provider.health_check(),
            self.sessions.health_check(),
        );

        fn named<E: std::fmt::Display>(
            name: &str,
            r: Result<ComponentHealth, E>,
        ) -> (String, Result<ComponentHealth, String>) {
            (name.to_string(), r.map_err(|e| e.to_string()))
        }

        health::aggregate(vec![
            named("stream_buffer", stream),
            named("working_memory", working),
            named("episodic_memory", episodic),
            named("semantic_memory", semantic),
            named("conceptual_memory", conceptual),
            named("meta_memory", meta),
            named("provider", provider),
            named("session_store", store),
        ])
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    async fn get_session(&self, session_id: &str) -> Result<UnifiedSession, Error> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }

    async fn push_event(&self, event: StreamEvent) {
        if let Err(e) = self.layers.stream.push(event).await {
            warn!(error = %e, "Failed to push stream event");
        }
    }
}
