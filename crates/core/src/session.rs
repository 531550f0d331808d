//! Session lifecycle — the finite-state machine guarding the orchestration loop.
//!
//! There is exactly one transition table:
//!
//! ```text
//! initializing   -> active
//! active         -> thinking | summarizing
//! thinking       -> tool_executing | active
//! tool_executing -> thinking
//! summarizing    -> ending
//! ending         -> ended
//! ended          -> initializing
//! ```
//!
//! A rejected transition is a programming/ordering bug, never a transient
//! fault: callers must not retry it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, SessionError};
use crate::health::ComponentHealth;

/// Lifecycle state of a [`UnifiedSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Active,
    Thinking,
    ToolExecuting,
    Summarizing,
    Ending,
    Ended,
}

impl SessionState {
    pub const ALL: [SessionState; 7] = [
        Self::Initializing,
        Self::Active,
        Self::Thinking,
        Self::ToolExecuting,
        Self::Summarizing,
        Self::Ending,
        Self::Ended,
    ];

    /// States reachable in one step from `self`.
    pub fn valid_transitions(self) -> &'static [SessionState] {
        match self {
            Self::Initializing => &[Self::Active],
            Self::Active => &[Self::Thinking, Self::Summarizing],
            Self::Thinking => &[Self::ToolExecuting, Self::Active],
            Self::ToolExecuting => &[Self::Thinking],
            Self::Summarizing => &[Self::Ending],
            Self::Ending => &[Self::Ended],
            Self::Ended => &[Self::Initializing],
        }
    }

    /// Whether a turn is currently in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Thinking | Self::ToolExecuting)
    }

    /// Whether the session can still take turns, i.e. it is not winding down.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::Active | Self::Thinking | Self::ToolExecuting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Thinking => "thinking",
            Self::ToolExecuting => "tool_executing",
            Self::Summarizing => "summarizing",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure lookup in the transition table. Self-loops are never valid.
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    from.valid_transitions().contains(&to)
}

/// Check a transition, returning the target state or a typed error.
pub fn transition(from: SessionState, to: SessionState) -> Result<SessionState, SessionError> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        tracing::error!(from = %from, to = %to, "Rejected session state transition");
        Err(SessionError::InvalidTransition {
            from,
            to,
            valid: from.valid_transitions().to_vec(),
        })
    }
}

/// One active user conversation, possibly spanning several channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSession {
    pub session_id: String,
    pub user_id: String,
    pub active_channel_id: String,
    /// Channels visited, in order; the active channel is always last.
    pub channel_history: Vec<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turn_count: u32,
}

impl UnifiedSession {
    /// Create a new session in the `initializing` state.
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            active_channel_id: channel_id.clone(),
            channel_history: vec![channel_id],
            state: SessionState::Initializing,
            started_at: now,
            last_activity_at: now,
            turn_count: 0,
        }
    }

    /// Apply a state-machine-checked transition.
    pub fn transition_to(&mut self, to: SessionState) -> Result<(), SessionError> {
        self.state = transition(self.state, to)?;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Record a move to another channel. Returns `true` if the channel changed.
    pub fn switch_channel(&mut self, channel_id: &str) -> bool {
        if self.active_channel_id == channel_id {
            return false;
        }
        self.active_channel_id = channel_id.to_string();
        self.channel_history.push(channel_id.to_string());
        self.last_activity_at = Utc::now();
        true
    }
}

/// Storage for live sessions.
///
/// Every state change goes through [`SessionStore::transition`], which is
/// atomic per session: it verifies the current state and the transition
/// table under one lock, so two callers can never both advance the same
/// session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    async fn create(&self, session: UnifiedSession) -> Result<(), Error>;

    /// Fetch a session by ID.
    async fn get(&self, session_id: &str) -> Result<Option<UnifiedSession>, Error>;

    /// The user's most recent live session. Sessions that are summarizing,
    /// ending or ended are never returned.
    async fn find_open_for_user(&self, user_id: &str) -> Result<Option<UnifiedSession>, Error>;

    /// Atomically move a live session to `channel_id`, touching only its
    /// channel fields and activity time.
    ///
    /// Returns the stored session and whether the channel changed, or `None`
    /// if the session has started winding down.
    async fn switch_channel(
        &self,
        session_id: &str,
        channel_id: &str,
    ) -> Result<Option<(UnifiedSession, bool)>, Error>;

    /// Atomically move `session_id` from `from` to `to`.
    ///
    /// Fails with [`SessionError::StateMismatch`] if the stored state is not
    /// `from`, and with [`SessionError::InvalidTransition`] if the table
    /// forbids the move.
    async fn transition(
        &self,
        session_id: &str,
        from: SessionState,
        to: SessionState,
    ) -> Result<UnifiedSession, Error>;

    /// Increment the turn counter, returning the new count.
    async fn record_turn(&self, session_id: &str) -> Result<u32, Error>;

    async fn health_check(&self) -> Result<ComponentHealth, Error> {
        Ok(ComponentHealth::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_table_exactly() {
        use SessionState::*;
        let allowed = [
            (Initializing, Active),
            (Active, Thinking),
            (Active, Summarizing),
            (Thinking, ToolExecuting),
            (Thinking, Active),
            (ToolExecuting, Thinking),
            (Summarizing, Ending),
            (Ending, Ended),
            (Ended, Initializing),
        ];
        for from in SessionState::ALL {
            for to in SessionState::ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    is_valid_transition(from, to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn no_self_loops() {
        for s in SessionState::ALL {
            assert!(!is_valid_transition(s, s), "{s} must not loop to itself");
        }
    }

    #[test]
    fn active_cannot_jump_to_ending() {
        let err = transition(SessionState::Active, SessionState::Ending).unwrap_err();
        match err {
            SessionError::InvalidTransition { from, to, valid } => {
                assert_eq!(from, SessionState::Active);
                assert_eq!(to, SessionState::Ending);
                assert_eq!(valid, vec![SessionState::Thinking, SessionState::Summarizing]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ended_only_reopens() {
        assert!(is_valid_transition(SessionState::Ended, SessionState::Initializing));
        for to in SessionState::ALL {
            if to != SessionState::Initializing {
                assert!(!is_valid_transition(SessionState::Ended, to));
            }
        }
    }

    #[test]
    fn new_session_starts_initializing() {
        let mut session = UnifiedSession::new("u1", "cli");
        assert_eq!(session.state, SessionState::Initializing);
        assert_eq!(session.channel_history, vec!["cli".to_string()]);

        session.transition_to(SessionState::Active).unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.transition_to(SessionState::Ended).is_err());
        assert_eq!(session.state, SessionState::Active);
    }

    #[test]
    fn channel_switch_tracks_history() {
        let mut session = UnifiedSession::new("u1", "cli");
        assert!(!session.switch_channel("cli"));
        assert!(session.switch_channel("telegram"));
        assert_eq!(session.active_channel_id, "telegram");
        assert_eq!(session.channel_history, vec!["cli", "telegram"]);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::ToolExecuting).unwrap();
        assert_eq!(json, r#""tool_executing""#);
    }
}
