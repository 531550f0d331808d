//! In-memory session store.

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::error::{Error, SessionError};
use mnemo_core::session::{self, SessionState, SessionStore, UnifiedSession};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Sessions held in a map behind one lock; every transition is a single
/// write-locked check-and-set.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, UnifiedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn not_found(session_id: &str) -> Error {
    SessionError::NotFound(session_id.to_string()).into()
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: UnifiedSession) -> Result<(), Error> {
        let mut map = self.sessions.write().await;
        if map.contains_key(&session.session_id) {
            return Err(Error::Validation(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        map.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<UnifiedSession>, Error> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn find_open_for_user(&self, user_id: &str) -> Result<Option<UnifiedSession>, Error> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.state.is_live())
            .max_by_key(|s| s.last_activity_at)
            .cloned())
    }

    async fn switch_channel(
        &self,
        session_id: &str,
        channel_id: &str,
    ) -> Result<Option<(UnifiedSession, bool)>, Error> {
        let mut map = self.sessions.write().await;
        let stored = map.get_mut(session_id).ok_or_else(|| not_found(session_id))?;
        if !stored.state.is_live() {
            return Ok(None);
        }
        let switched = stored.switch_channel(channel_id);
        if switched {
            debug!(session_id = %session_id, channel = %channel_id, "Session channel switched");
        }
        Ok(Some((stored.clone(), switched)))
    }

    async fn transition(
        &self,
        session_id: &str,
        from: SessionState,
        to: SessionState,
    ) -> Result<UnifiedSession, Error> {
        let mut map = self.sessions.write().await;
        let stored = map.get_mut(session_id).ok_or_else(|| not_found(session_id))?;
        if stored.state != from {
            return Err(SessionError::StateMismatch {
                session_id: session_id.to_string(),
                expected: from,
                actual: stored.state,
            }
            .into());
        }
        stored.state = session::transition(from, to)?;
        stored.last_activity_at = Utc::now();
        debug!(session_id = %session_id, from = %from, to = %to, "Session transition");
        Ok(stored.clone())
    }

    async fn record_turn(&self, session_id: &str) -> Result<u32, Error> {
        let mut map = self.sessions.write().await;
        let stored = map.get_mut(session_id).ok_or_else(|| not_found(session_id))?;
        stored.turn_count += 1;
        stored.last_activity_at = Utc::now();
        Ok(stored.turn_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn active_session(store: &InMemorySessionStore) -> UnifiedSession {
        let s = UnifiedSession::new("u1", "cli");
        store.create(s.clone()).await.unwrap();
        store
            .transition(&s.session_id, SessionState::Initializing, SessionState::Active)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn transition_checks_stored_state() {
        let store = InMemorySessionStore::new();
        let s = active_session(&store).await;

        let err = store
            .transition(&s.session_id, SessionState::Thinking, SessionState::Active)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::StateMismatch {
                actual: SessionState::Active,
                ..
            })
        ));

        let err = store
            .transition(&s.session_id, SessionState::Active, SessionState::Ending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::InvalidTransition { .. })));

        let stored = store.get(&s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Active);
    }

    #[tokio::test]
    async fn concurrent_transitions_only_one_wins() {
        let store = Arc::new(InMemorySessionStore::new());
        let s = active_session(&store).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = s.session_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, SessionState::Active, SessionState::Thinking)
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn switch_channel_keeps_concurrent_turn_count() {
        let store = InMemorySessionStore::new();
        let s = active_session(&store).await;
        let snapshot = store.get(&s.session_id).await.unwrap().unwrap();

        // A turn finishes between the lookup and the switch.
        store.record_turn(&s.session_id).await.unwrap();

        let (switched, changed) = store
            .switch_channel(&snapshot.session_id, "telegram")
            .await
            .unwrap()
            .unwrap();
        assert!(changed);
        assert_eq!(switched.turn_count, 1);
        assert_eq!(switched.state, SessionState::Active);
        assert_eq!(switched.channel_history, vec!["cli", "telegram"]);

        let (_, changed) = store
            .switch_channel(&s.session_id, "telegram")
            .await
            .unwrap()
            .unwrap();
        assert!(!changed);
        assert_eq!(store.get(&s.session_id).await.unwrap().unwrap().turn_count, 1);
        assert!(store.switch_channel("missing", "cli").await.is_err());
    }

    #[tokio::test]
    async fn switch_channel_refuses_winding_down_session() {
        let store = InMemorySessionStore::new();
        let s = active_session(&store).await;
        store
            .transition(&s.session_id, SessionState::Active, SessionState::Summarizing)
            .await
            .unwrap();

        assert!(store.switch_channel(&s.session_id, "telegram").await.unwrap().is_none());
        let stored = store.get(&s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.active_channel_id, "cli");
    }

    #[tokio::test]
    async fn find_open_skips_sessions_winding_down() {
        let store = InMemorySessionStore::new();
        let s = active_session(&store).await;
        assert!(store.find_open_for_user("u1").await.unwrap().is_some());
        assert!(store.find_open_for_user("u2").await.unwrap().is_none());

        for (from, to) in [
            (SessionState::Active, SessionState::Summarizing),
            (SessionState::Summarizing, SessionState::Ending),
            (SessionState::Ending, SessionState::Ended),
        ] {
            store.transition(&s.session_id, from, to).await.unwrap();
            assert!(
                store.find_open_for_user("u1").await.unwrap().is_none(),
                "{to} session was returned as open"
            );
        }
    }

    #[tokio::test]
    async fn record_turn_counts_up() {
        let store = InMemorySessionStore::new();
        let s = active_session(&store).await;
        assert_eq!(store.record_turn(&s.session_id).await.unwrap(), 1);
        assert_eq!(store.record_turn(&s.session_id).await.unwrap(), 2);
        assert!(store.record_turn("missing").await.is_err());
    }
}
