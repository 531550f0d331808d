//! Provider fallback — ordered chain of breaker-guarded providers.
//!
//! Each call walks the chain in order. Providers whose breaker is open are
//! skipped; the first eligible one is streamed through its breaker and its
//! chunks are forwarded to the caller. A provider that fails (to open, while
//! streaming, or by going idle past its timeout) is charged on its breaker and
//! the walk continues. When nothing is left the caller receives one
//! [`ProviderError::ChainExhausted`] naming every provider.
//!
//! In [`FailoverMode::Eager`] chunks are forwarded as they arrive, so a
//! partial answer from a failed provider can precede the next provider's
//! answer. [`FailoverMode::Buffered`] holds each provider's chunks until its
//! stream completes and drops them on failure.

use async_trait::async_trait;
use mnemo_config::FailoverMode;
use mnemo_core::error::{ProviderError, ProviderFailure};
use mnemo_core::health::ComponentHealth;
use mnemo_core::provider::{
    ChatChunk, ChatParams, ChunkReceiver, LlmProvider, ProviderCapabilities,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerState, CircuitBreaker};

const CHANNEL_CAPACITY: usize = 64;

/// A single entry in the fallback chain.
#[derive(Clone)]
pub struct ChainEntry {
    pub name: String,
    pub provider: Arc<dyn LlmProvider>,
    pub breaker: Arc<CircuitBreaker>,
    /// Bound on opening the stream and on the gap between two chunks.
    pub timeout: Duration,
    /// Overrides the caller's model for this provider.
    pub model: Option<String>,
}

impl ChainEntry {
    pub fn new(provider: Arc<dyn LlmProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: provider.name().to_string(),
            provider,
            breaker,
            timeout: Duration::from_secs(120),
            model: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Per-provider snapshot for health reporting.
#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub name: String,
    pub breaker: BreakerState,
    pub failures: u32,
}

pub struct FallbackChain {
    name: String,
    entries: Arc<Vec<ChainEntry>>,
    mode: FailoverMode,
}

enum Attempt {
    Completed,
    /// The caller dropped the receiver.
    Detached,
}

impl FallbackChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(Vec::new()),
            mode: FailoverMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: FailoverMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn add(mut self, entry: ChainEntry) -> Self {
        Arc::make_mut(&mut self.entries).push(entry);
        self
    }

    /// Add a provider with a default breaker (5 failures / 60s) and timeout (120s).
    pub fn add_default(self, provider: Arc<dyn LlmProvider>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            provider.name(),
            5,
            Duration::from_secs(60),
        ));
        self.add(ChainEntry::new(provider, breaker))
    }

    pub fn mode(&self) -> FailoverMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self) -> Vec<EntryStatus> {
        self.entries
            .iter()
            .map(|e| EntryStatus {
                name: e.name.clone(),
                breaker: e.breaker.state(),
                failures: e.breaker.failure_count(),
            })
            .collect()
    }
}

/// Stream one provider to completion, forwarding (or buffering) its chunks.
async fn attempt(
    entry: &ChainEntry,
    mut params: ChatParams,
    mode: FailoverMode,
    out: &mpsc::Sender<Result<ChatChunk, ProviderError>>,
) -> Result<Attempt, ProviderError> {
    if let Some(model) = &entry.model {
        params.model = model.clone();
    }

    let opened = tokio::select! {
        biased;
        _ = out.closed() => return Ok(Attempt::Detached),
        opened = tokio::time::timeout(entry.timeout, entry.provider.chat(params)) => opened,
    };
    let mut rx = match opened {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProviderError::Timeout(format!(
                "'{}' did not open a stream within {}ms",
                entry.name,
                entry.timeout.as_millis()
            )));
        }
    };

    let mut held = Vec::new();
    let mut forwarded = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = out.closed() => return Ok(Attempt::Detached),
            next = tokio::time::timeout(entry.timeout, rx.recv()) => next,
        };
        let item = match next {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                return Err(ProviderError::Timeout(format!(
                    "'{}' stream idle for {}ms",
                    entry.name,
                    entry.timeout.as_millis()
                )));
            }
        };
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                if forwarded > 0 {
                    warn!(
                        provider = %entry.name,
                        forwarded,
                        "Stream failed after partial output was forwarded"
                    );
                }
                return Err(e);
            }
        };
        match mode {
            FailoverMode::Eager => {
                if out.send(Ok(chunk)).await.is_err() {
                    return Ok(Attempt::Detached);
                }
                forwarded += 1;
            }
            FailoverMode::Buffered => held.push(chunk),
        }
    }

    for chunk in held {
        if out.send(Ok(chunk)).await.is_err() {
            return Ok(Attempt::Detached);
        }
    }
    Ok(Attempt::Completed)
}

async fn run_chain(
    chain: String,
    entries: Arc<Vec<ChainEntry>>,
    mode: FailoverMode,
    params: ChatParams,
    out: mpsc::Sender<Result<ChatChunk, ProviderError>>,
) {
    let mut failures = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if out.is_closed() {
            debug!(chain = %chain, "Caller dropped the stream before the next provider");
            return;
        }
        info!(
            provider = %entry.name,
            attempt = i + 1,
            total = entries.len(),
            "Fallback: trying provider"
        );

        if entry.breaker.try_acquire().is_err() {
            debug!(provider = %entry.name, "Fallback: circuit open, skipping");
            failures.push(ProviderFailure {
                provider: entry.name.clone(),
                reason: "circuit open".into(),
            });
            continue;
        }

        match attempt(entry, params.clone(), mode, &out).await {
            Ok(Attempt::Completed) => {
                entry.breaker.record_success();
                return;
            }
            Ok(Attempt::Detached) => {
                // Nothing was learned about the provider.
                entry.breaker.release();
                debug!(provider = %entry.name, "Caller dropped the stream");
                return;
            }
            Err(e) => {
                entry.breaker.record_failure();
                warn!(
                    provider = %entry.name,
                    error = %e,
                    "Fallback: provider failed, trying next"
                );
                failures.push(ProviderFailure {
                    provider: entry.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    warn!(chain = %chain, "Fallback chain exhausted");
    let _ = out
        .send(Err(ProviderError::ChainExhausted { chain, failures }))
        .await;
}

#[async_trait]
impl LlmProvider for FallbackChain {
    fn name(&self) -> &str {
        &self.name
    }

    /// A capability is advertised only when every provider in the chain has it.
    fn capabilities(&self) -> ProviderCapabilities {
        if self.entries.is_empty() {
            return ProviderCapabilities::default();
        }
        let all = |f: fn(&ProviderCapabilities) -> bool| {
            self.entries.iter().all(|e| f(&e.provider.capabilities()))
        };
        ProviderCapabilities {
            supports_tools: all(|c| c.supports_tools),
            supports_vision: all(|c| c.supports_vision),
            supports_thinking: all(|c| c.supports_thinking),
            supports_streaming: all(|c| c.supports_streaming),
        }
    }

    async fn chat(&self, params: ChatParams) -> Result<ChunkReceiver, ProviderError> {
        if self.entries.is_empty() {
            return Err(ProviderError::NotConfigured(
                "No providers in fallback chain".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_chain(
            self.name.clone(),
            Arc::clone(&self.entries),
            self.mode,
            params,
            tx,
        ));
        Ok(rx)
    }

    /// Healthy when every breaker is closed, degraded while at least one
    /// provider is still usable, unhealthy otherwise.
    async fn health_check(&self) -> Result<ComponentHealth, ProviderError> {
        if self.entries.is_empty() {
            return Ok(ComponentHealth::unhealthy("no providers configured"));
        }
        let status = self.status();
        let open: Vec<&str> = status
            .iter()
            .filter(|s| s.breaker == BreakerState::Open)
            .map(|s| s.name.as_str())
            .collect();
        let half_open = status
            .iter()
            .filter(|s| s.breaker == BreakerState::HalfOpen)
            .count();

        Ok(if open.len() == status.len() {
            ComponentHealth::unhealthy(format!("all circuits open: {}", open.join(", ")))
        } else if !open.is_empty() || half_open > 0 {
            ComponentHealth::degraded(format!(
                "{} open, {} half-open of {}",
                open.len(),
                half_open,
                status.len()
            ))
        } else {
            ComponentHealth::healthy()
        })
    }
}
