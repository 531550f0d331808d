//! In-memory episodic memory — whole sessions, searchable after the fact.

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::error::MemoryError;
use mnemo_core::memory::{EpisodicMemory, EpisodicMessage, EpisodicSession};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::scoring::text_score;

pub struct InMemoryEpisodicMemory {
    sessions: RwLock<HashMap<String, EpisodicSession>>,
}

impl InMemoryEpisodicMemory {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryEpisodicMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut sessions: Vec<EpisodicSession>, limit: usize) -> Vec<EpisodicSession> {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sessions.truncate(limit);
    sessions
}

#[async_trait]
impl EpisodicMemory for InMemoryEpisodicMemory {
    async fn create_session(&self, session: EpisodicSession) -> Result<(), MemoryError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<EpisodicSession>, MemoryError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn end_session(
        &self,
        session_id: &str,
        summary: String,
        topics: Vec<String>,
    ) -> Result<(), MemoryError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(session_id)
            .ok_or_else(|| MemoryError::NotFound(format!("episodic session {session_id}")))?;
        session.summary = Some(summary);
        session.topics = topics;
        session.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, MemoryError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn add_message(
        &self,
        session_id: &str,
        message: EpisodicMessage,
    ) -> Result<(), MemoryError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(session_id)
            .ok_or_else(|| MemoryError::NotFound(format!("episodic session {session_id}")))?;
        if !session.channels.contains(&message.channel_id) {
            session.channels.push(message.channel_id.clone());
        }
        session.messages.push(message);
        Ok(())
    }

    async fn get_recent_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicSession>, MemoryError> {
        let map = self.sessions.read().await;
        let sessions = map.values().filter(|s| s.user_id == user_id).cloned().collect();
        Ok(newest_first(sessions, limit))
    }

    async fn search_by_topic(
        &self,
        user_id: &str,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicSession>, MemoryError> {
        let needle = topic.trim().to_lowercase();
        let map = self.sessions.read().await;
        let sessions = map
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| s.topics.iter().any(|t| t.to_lowercase().contains(&needle)))
            .cloned()
            .collect();
        Ok(newest_first(sessions, limit))
    }

    async fn search_by_content(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicSession>, MemoryError> {
        let map = self.sessions.read().await;
        let mut scored: Vec<(f64, EpisodicSession)> = map
            .values()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| {
                let summary_score = s
                    .summary
                    .as_deref()
                    .map(|sum| text_score(query, sum))
                    .unwrap_or(0.0);
                let message_score = s
                    .messages
                    .iter()
                    .map(|m| text_score(query, &m.content))
                    .fold(0.0f64, f64::max);
                let score = summary_score.max(message_score);
                (score > 0.0).then(|| (score, s.clone()))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.started_at.cmp(&a.1.started_at))
        });
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }

    async fn get_unconsolidated(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<EpisodicSession>, MemoryError> {
        let map = self.sessions.read().await;
        let mut pending: Vec<EpisodicSession> = map
            .values()
            .filter(|s| s.is_ended() && !s.consolidated && s.consolidation_failures < max_attempts)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.consolidation_failures
                .cmp(&b.consolidation_failures)
                .then_with(|| a.ended_at.cmp(&b.ended_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_consolidated(&self, session_id: &str) -> Result<(), MemoryError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(session_id)
            .ok_or_else(|| MemoryError::NotFound(format!("episodic session {session_id}")))?;
        session.consolidated = true;
        Ok(())
    }

    async fn record_consolidation_failure(&self, session_id: &str) -> Result<u32, MemoryError> {
        let mut map = self.sessions.write().await;
        let session = map
            .get_mut(session_id)
            .ok_or_else(|| MemoryError::NotFound(format!("episodic session {session_id}")))?;
        session.consolidation_failures = session.consolidation_failures.saturating_add(1);
        Ok(session.consolidation_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::message::Role;

    fn msg(content: &str, channel: &str) -> EpisodicMessage {
        EpisodicMessage {
            role: Role::User,
            content: content.into(),
            channel_id: channel.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_message_tracks_channels() {
        let mem = InMemoryEpisodicMemory::new();
        mem.create_session(EpisodicSession::new("s1", "u1", "cli"))
            .await
            .unwrap();
        mem.add_message("s1", msg("hello", "cli")).await.unwrap();
        mem.add_message("s1", msg("again", "telegram")).await.unwrap();

        let s = mem.get_session("s1").await.unwrap().unwrap();
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.channels, vec!["cli", "telegram"]);
    }

    #[tokio::test]
    async fn add_message_to_missing_session_fails() {
        let mem = InMemoryEpisodicMemory::new();
        let err = mem.add_message("nope", msg("x", "cli")).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn ended_sessions_queue_for_consolidation() {
        let mem = InMemoryEpisodicMemory::new();
        mem.create_session(EpisodicSession::new("s1", "u1", "cli"))
            .await
            .unwrap();
        mem.create_session(EpisodicSession::new("s2", "u1", "cli"))
            .await
            .unwrap();
        assert!(mem.get_unconsolidated(10, 3).await.unwrap().is_empty());

        mem.end_session("s1", "talked about tea".into(), vec!["tea".into()])
            .await
            .unwrap();
        let pending = mem.get_unconsolidated(10, 3).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, "s1");

        mem.mark_consolidated("s1").await.unwrap();
        assert!(mem.get_unconsolidated(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_sessions_move_back_then_drop_out() {
        let mem = InMemoryEpisodicMemory::new();
        for id in ["s1", "s2"] {
            mem.create_session(EpisodicSession::new(id, "u1", "cli"))
                .await
                .unwrap();
            mem.end_session(id, String::new(), Vec::new()).await.unwrap();
        }

        assert_eq!(mem.record_consolidation_failure("s1").await.unwrap(), 1);
        let pending = mem.get_unconsolidated(1, 2).await.unwrap();
        assert_eq!(pending[0].session_id, "s2");

        assert_eq!(mem.record_consolidation_failure("s1").await.unwrap(), 2);
        let pending = mem.get_unconsolidated(10, 2).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, "s2");

        assert!(mem.record_consolidation_failure("nope").await.is_err());
    }

    #[tokio::test]
    async fn search_by_topic_and_content() {
        let mem = InMemoryEpisodicMemory::new();
        mem.create_session(EpisodicSession::new("s1", "u1", "cli"))
            .await
            .unwrap();
        mem.add_message("s1", msg("my cat is named Miso", "cli"))
            .await
            .unwrap();
        mem.end_session("s1", "pets".into(), vec!["Pets".into()])
            .await
            .unwrap();

        mem.create_session(EpisodicSession::new("s2", "u2", "cli"))
            .await
            .unwrap();
        mem.add_message("s2", msg("my cat", "cli")).await.unwrap();

        let by_topic = mem.search_by_topic("u1", "pets", 5).await.unwrap();
        assert_eq!(by_topic.len(), 1);

        let by_content = mem.search_by_content("u1", "cat named", 5).await.unwrap();
        assert_eq!(by_content.len(), 1);
        assert_eq!(by_content[0].session_id, "s1");

        assert!(mem.search_by_content("u1", "zebra", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_sessions_newest_first() {
        let mem = InMemoryEpisodicMemory::new();
        let mut old = EpisodicSession::new("old", "u1", "cli");
        old.started_at = Utc::now() - chrono::Duration::days(2);
        mem.create_session(old).await.unwrap();
        mem.create_session(EpisodicSession::new("new", "u1", "cli"))
            .await
            .unwrap();

        let recent = mem.get_recent_sessions("u1", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "new");
        assert!(mem.delete_session("old").await.unwrap());
        assert!(!mem.delete_session("old").await.unwrap());
    }
}
