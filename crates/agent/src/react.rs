//! ReAct loop — stream, act on tool calls, repeat.
//!
//! One turn runs as:
//!
//! 1. [`ReactLoop::begin`] moves the session `active -> thinking`.
//! 2. [`ReactLoop::run`] streams a provider round, forwarding deltas as
//!    events. If the round requested tools the session moves to
//!    `tool_executing`, each call is executed under the tool timeout, its
//!    result is appended to the conversation and the session returns to
//!    `thinking` for the next round.
//! 3. [`ReactLoop::complete`] moves the session back to `active`, counts the
//!    turn and emits `done`.
//!
//! The loop stops when a round requests no tools, after `max_iterations`
//! tool rounds, once `total_timeout_ms` has elapsed, when the consumer
//! cancels, or on a permanent provider error. Only the last one emits an
//! `error` event; a consumer that is still listening always sees exactly one
//! `done`, last.
//!
//! Events for a turn are written by this loop alone. Cancellation is only
//! observed when an event is about to be emitted, so the session is never
//! left between two states.

use mnemo_config::ReActConfig;
use mnemo_core::error::{Error, ProviderError, SessionError};
use mnemo_core::message::Message;
use mnemo_core::provider::{ChatChunk, ChatParams, LlmProvider, TokenUsage, ToolDefinition};
use mnemo_core::session::{SessionState, SessionStore};
use mnemo_core::tool::{ToolCallRequest, ToolExecutor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::stream_event::{ReActEvent, StopReason};

/// Shared flag a consumer sets to abort a turn.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The consumer stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// The single writer of a turn's events.
pub struct EventSink {
    tx: mpsc::Sender<ReActEvent>,
    cancel: CancelToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ReActEvent>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }

    /// Emit one event; fails once the turn was cancelled or the receiver dropped.
    pub async fn emit(&self, event: ReActEvent) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        self.tx.send(event).await.map_err(|_| Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// A consumer's view of a running turn.
#[derive(Debug)]
pub struct TurnStream {
    rx: mpsc::Receiver<ReActEvent>,
    cancel: CancelToken,
}

impl TurnStream {
    /// Create a connected stream and sink pair.
    pub fn channel(buffer: usize) -> (TurnStream, EventSink) {
        let (tx, rx) = mpsc::channel(buffer);
        let cancel = CancelToken::new();
        (
            TurnStream {
                rx,
                cancel: cancel.clone(),
            },
            EventSink::new(tx, cancel),
        )
    }

    pub async fn next(&mut self) -> Option<ReActEvent> {
        self.rx.recv().await
    }

    /// Abort the turn. Events already queued can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<ReActEvent> {
        let mut events = Vec::new();
        while let Some(e) = self.rx.recv().await {
            events.push(e);
        }
        events
    }
}

/// Everything one turn needs besides the loop's own collaborators.
pub struct TurnInput {
    pub session_id: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    /// Conversation so far, ending with the user's message.
    pub messages: Vec<Message>,
    pub executor: Arc<dyn ToolExecutor>,
}

/// What a finished loop produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    /// Text of the last provider round.
    pub answer: String,
    /// Assistant and tool messages added during the turn.
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
    /// Tool rounds executed.
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub error: Option<String>,
}

enum RoundError {
    Provider(ProviderError),
    Cancelled,
}

impl From<Cancelled> for RoundError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

#[derive(Default)]
struct Round {
    text: String,
    thinking: String,
    tool_calls: Vec<ToolCallRequest>,
}

pub struct ReactLoop {
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<dyn SessionStore>,
    config: ReActConfig,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ReactLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<dyn SessionStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            sessions,
            config: ReActConfig::default(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_config(mut self, config: ReActConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn config(&self) -> &ReActConfig {
        &self.config
    }

    /// Claim the session for a turn: `active -> thinking`.
    ///
    /// A session that already has a turn in flight is reported as busy.
    pub async fn begin(&self, session_id: &str) -> Result<(), Error> {
        match self
            .sessions
            .transition(session_id, SessionState::Active, SessionState::Thinking)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Session(SessionError::StateMismatch { actual, .. })) if actual.is_busy() => {
                Err(SessionError::Busy(session_id.to_string()).into())
            }
            Err(Error::Session(SessionError::StateMismatch { actual, .. })) => {
                error!(session_id = %session_id, from = %actual, to = %SessionState::Thinking, "Session cannot start a turn");
                Err(SessionError::InvalidTransition {
                    from: actual,
                    to: SessionState::Thinking,
                    valid: actual.valid_transitions().to_vec(),
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the loop on a session already in `thinking`.
    ///
    /// Returns with the session back in `thinking`, ready for [`complete`](Self::complete).
    pub async fn run(&self, input: TurnInput, sink: &EventSink) -> TurnOutcome {
        let deadline = Instant::now() + self.config.total_timeout();
        let TurnInput {
            session_id,
            system_prompt,
            tools,
            mut messages,
            executor,
        } = input;
        let first_new = messages.len();

        let mut usage = TokenUsage::default();
        let mut iterations = 0u32;
        let mut answer = String::new();
        let mut error_message = None;

        info!(session_id = %session_id, model = %self.model, max_iter = self.config.max_iterations, "Turn starting");

        let stop_reason = loop {
            if sink.is_cancelled() {
                break StopReason::Cancelled;
            }

            let mut params = ChatParams::new(&self.model, &system_prompt);
            params.messages = messages.clone();
            params.tools = tools.clone();
            params.temperature = self.temperature;
            params.max_tokens = self.max_tokens;

            let mut round = Round::default();
            let streamed = tokio::time::timeout_at(
                deadline,
                self.stream_round(params, sink, &mut round, &mut usage),
            )
            .await;
            answer = round.text.clone();

            match streamed {
                Err(_) => {
                    warn!(session_id = %session_id, "Turn timed out while streaming");
                    break StopReason::Timeout;
                }
                Ok(Err(RoundError::Cancelled)) => break StopReason::Cancelled,
                Ok(Err(RoundError::Provider(e))) => {
                    warn!(session_id = %session_id, error = %e, "Provider failed, ending turn");
                    let message = e.to_string();
                    error_message = Some(message.clone());
                    let _ = sink.emit(ReActEvent::Error { message }).await;
                    break StopReason::Error;
                }
                Ok(Ok(())) => {}
            }

            if round.tool_calls.is_empty() {
                messages.push(Message::assistant(&round.text));
                break StopReason::Completed;
            }

            // ── Tool round ──
            let calls = std::mem::take(&mut round.tool_calls);
            messages.push(Message::assistant_with_calls(&round.text, calls.clone()));
            if let Err(e) = self
                .sessions
                .transition(&session_id, SessionState::Thinking, SessionState::ToolExecuting)
                .await
            {
                error_message = Some(e.to_string());
                let _ = sink.emit(ReActEvent::Error { message: e.to_string() }).await;
                break StopReason::Error;
            }

            let mut cancelled = false;
            for call in calls {
                if sink.emit(ReActEvent::ToolCall { call: call.clone() }).await.is_err() {
                    cancelled = true;
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                let timeout = self.config.tool_timeout().min(remaining);
                let result = executor.execute(&call, timeout).await;
                debug!(
                    session_id = %session_id,
                    tool = %call.tool_name,
                    success = result.success,
                    duration_ms = result.duration_ms,
                    "Tool finished"
                );
                messages.push(Message::tool_result(&result));
                if sink.emit(ReActEvent::ToolResult { result }).await.is_err() {
                    cancelled = true;
                    break;
                }
            }

            if let Err(e) = self
                .sessions
                .transition(&session_id, SessionState::ToolExecuting, SessionState::Thinking)
                .await
            {
                error_message = Some(e.to_string());
                let _ = sink.emit(ReActEvent::Error { message: e.to_string() }).await;
                break StopReason::Error;
            }
            iterations += 1;

            if cancelled {
                break StopReason::Cancelled;
            }
            if iterations >= self.config.max_iterations {
                info!(session_id = %session_id, iterations, "Max iterations reached");
                break StopReason::MaxIterations;
            }
            if Instant::now() >= deadline {
                warn!(session_id = %session_id, "Turn timed out after tool round");
                break StopReason::Timeout;
            }
        };

        info!(
            session_id = %session_id,
            iterations,
            stop_reason = stop_reason.as_str(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Turn finished"
        );

        TurnOutcome {
            session_id,
            answer,
            messages: messages.split_off(first_new),
            usage,
            iterations,
            stop_reason,
            error: error_message,
        }
    }

    /// Return the session to `active`, count the turn and emit `done`.
    pub async fn complete(&self, outcome: &TurnOutcome, sink: &EventSink) {
        let id = &outcome.session_id;
        if let Err(e) = self
            .sessions
            .transition(id, SessionState::Thinking, SessionState::Active)
            .await
        {
            error!(session_id = %id, error = %e, "Failed to release session after turn");
        }
        if let Err(e) = self.sessions.record_turn(id).await {
            warn!(session_id = %id, error = %e, "Failed to count turn");
        }
        let _ = sink
            .emit(ReActEvent::Done {
                usage: outcome.usage,
                iterations: outcome.iterations,
                stop_reason: outcome.stop_reason,
            })
            .await;
    }

    /// `begin`, `run` and `complete` in one call.
    pub async fn run_turn(&self, input: TurnInput, sink: &EventSink) -> Result<TurnOutcome, Error> {
        self.begin(&input.session_id).await?;
        let outcome = self.run(input, sink).await;
        self.complete(&outcome, sink).await;
        Ok(outcome)
    }

    async fn stream_round(
        &self,
        params: ChatParams,
        sink: &EventSink,
        round: &mut Round,
        usage: &mut TokenUsage,
    ) -> Result<(), RoundError> {
        let streaming = self.config.streaming_enabled;
        let mut rx = self.provider.chat(params).await.map_err(RoundError::Provider)?;

        while let Some(item) = rx.recv().await {
            match item.map_err(RoundError::Provider)? {
                ChatChunk::Text { text } => {
                    round.text.push_str(&text);
                    if streaming {
                        sink.emit(ReActEvent::MessageDelta { content: text }).await?;
                    }
                }
                ChatChunk::Thinking { text } => {
                    round.thinking.push_str(&text);
                    if streaming {
                        sink.emit(ReActEvent::ThinkingDelta { content: text }).await?;
                    }
                }
                ChatChunk::ToolCall { call } => round.tool_calls.push(call),
                ChatChunk::Usage { usage: u } => usage.add(&u),
            }
        }

        if !streaming {
            if !round.thinking.is_empty() {
                sink.emit(ReActEvent::ThinkingDelta {
                    content: round.thinking.clone(),
                })
                .await?;
            }
            if !round.text.is_empty() {
                sink.emit(ReActEvent::MessageDelta {
                    content: round.text.clone(),
                })
                .await?;
            }
        }
        Ok(())
    }
}
