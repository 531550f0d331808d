//! Error types for the mnemo domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and [`Error::kind`]
//! maps every failure onto the engine's handling taxonomy.

use crate::session::SessionState;
use thiserror::Error;

/// The top-level error type for all mnemo operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Session lifecycle errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Request validation ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure must be handled by the orchestration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable; retried by the fallback chain, never by the caller.
    Transient,
    /// Non-retryable; surfaced to the channel as an `error` event.
    Permanent,
    /// Rejected before the loop starts.
    Validation,
    /// Tool failure, fed back to the model as data.
    Tool,
    /// Retryable at the provider level, loop termination at the loop level.
    Timeout,
    /// State-machine violation. Fatal to the current call, never retried.
    Session,
}

impl Error {
    /// Classify this error for retry and surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(ProviderError::Timeout(_)) => ErrorKind::Timeout,
            Self::Provider(e) if e.is_retryable() => ErrorKind::Transient,
            Self::Provider(_) => ErrorKind::Permanent,
            Self::Tool(_) => ErrorKind::Tool,
            Self::Session(SessionError::Busy(_)) | Self::Session(SessionError::NotFound(_)) => {
                ErrorKind::Validation
            }
            Self::Session(_) => ErrorKind::Session,
            Self::Validation(_) | Self::Config { .. } => ErrorKind::Validation,
            Self::Channel(_) | Self::Memory(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Circuit open for provider '{provider}'")]
    CircuitOpen { provider: String },

    #[error("All providers in chain '{chain}' failed: {}", format_failures(.failures))]
    ChainExhausted {
        chain: String,
        failures: Vec<ProviderFailure>,
    },
}

/// One provider's failure inside an exhausted fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers attempted".into();
    }
    failures
        .iter()
        .map(|f| format!("{} ({})", f.provider, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProviderError {
    /// Whether another attempt (on this or another provider) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 429,
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::CircuitOpen { .. } => true,
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::NotConfigured(_)
            | Self::ChainExhausted { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(
        "Invalid session transition {from} -> {to} (valid from {from}: {})",
        format_states(.valid)
    )]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
        valid: Vec<SessionState>,
    },

    #[error("Session {session_id} is in state {actual}, expected {expected}")]
    StateMismatch {
        session_id: String,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} already has a turn in flight")]
    Busy(String),
}

fn format_states(states: &[SessionState]) -> String {
    if states.is_empty() {
        return "none".into();
    }
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn chain_exhausted_names_every_provider() {
        let err = ProviderError::ChainExhausted {
            chain: "default".into(),
            failures: vec![
                ProviderFailure {
                    provider: "primary".into(),
                    reason: "HTTP 500".into(),
                },
                ProviderFailure {
                    provider: "backup".into(),
                    reason: "connection refused".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("primary"));
        assert!(msg.contains("backup"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
    }

    #[test]
    fn error_kinds_follow_taxonomy() {
        let timeout = Error::Provider(ProviderError::Timeout("slow".into()));
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let network = Error::Provider(ProviderError::Network("reset".into()));
        assert_eq!(network.kind(), ErrorKind::Transient);

        let auth = Error::Provider(ProviderError::AuthenticationFailed("nope".into()));
        assert_eq!(auth.kind(), ErrorKind::Permanent);

        let bad = Error::Session(SessionError::InvalidTransition {
            from: SessionState::Active,
            to: SessionState::Ending,
            valid: SessionState::Active.valid_transitions().to_vec(),
        });
        assert_eq!(bad.kind(), ErrorKind::Session);

        assert_eq!(Error::Validation("empty".into()).kind(), ErrorKind::Validation);
    }

    #[test]
    fn invalid_transition_lists_valid_targets() {
        let err = SessionError::InvalidTransition {
            from: SessionState::Active,
            to: SessionState::Ending,
            valid: SessionState::Active.valid_transitions().to_vec(),
        };
        let msg = err.to_string();
        assert!(msg.contains("active -> ending"));
        assert!(msg.contains("thinking, summarizing"));
    }
}
