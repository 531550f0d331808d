//! In-memory working memory — the last N turns per user.

use async_trait::async_trait;
use mnemo_core::error::MemoryError;
use mnemo_core::memory::{Turn, WorkingMemory};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Characters kept per turn in a compressed summary.
const SUMMARY_TURN_CHARS: usize = 160;

pub struct InMemoryWorkingMemory {
    turns: RwLock<HashMap<String, VecDeque<Turn>>>,
    capacity: usize,
}

impl InMemoryWorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryWorkingMemory {
    fn default() -> Self {
        Self::new(20)
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[async_trait]
impl WorkingMemory for InMemoryWorkingMemory {
    async fn add_turn(&self, user_id: &str, turn: Turn) -> Result<(), MemoryError> {
        let mut map = self.turns.write().await;
        let list = map.entry(user_id.to_string()).or_default();
        list.push_back(turn);
        while list.len() > self.capacity {
            list.pop_front();
        }
        Ok(())
    }

    async fn get_turns(&self, user_id: &str) -> Result<Vec<Turn>, MemoryError> {
        Ok(self
            .turns
            .read()
            .await
            .get(user_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn compress(&self, user_id: &str) -> Result<Option<String>, MemoryError> {
        let map = self.turns.read().await;
        let Some(list) = map.get(user_id).filter(|l| !l.is_empty()) else {
            return Ok(None);
        };

        let mut channels: Vec<&str> = Vec::new();
        for t in list {
            if !channels.contains(&t.channel_id.as_str()) {
                channels.push(&t.channel_id);
            }
        }

        let mut summary = format!(
            "Conversation summary ({} turns via {}):",
            list.len(),
            channels.join(", ")
        );
        for t in list {
            summary.push_str(&format!(
                "\n- {}: {}",
                t.role.as_str(),
                clip(&t.content, SUMMARY_TURN_CHARS)
            ));
        }
        Ok(Some(summary))
    }

    async fn flush(&self, user_id: &str) -> Result<Vec<Turn>, MemoryError> {
        Ok(self
            .turns
            .write()
            .await
            .remove(user_id)
            .map(Vec::from)
            .unwrap_or_default())
    }

    async fn clear(&self, user_id: &str) -> Result<(), MemoryError> {
        self.turns.write().await.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::message::Role;

    #[tokio::test]
    async fn evicts_oldest_over_capacity() {
        let wm = InMemoryWorkingMemory::new(3);
        for i in 0..5 {
            wm.add_turn("u1", Turn::new(Role::User, format!("t{i}"), "cli"))
                .await
                .unwrap();
        }
        let turns = wm.get_turns("u1").await.unwrap();
        assert_eq!(
            turns.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(),
            vec!["t2", "t3", "t4"]
        );
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let wm = InMemoryWorkingMemory::default();
        wm.add_turn("u1", Turn::new(Role::User, "hi", "cli")).await.unwrap();
        assert!(wm.get_turns("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compress_summarises_without_consuming() {
        let wm = InMemoryWorkingMemory::default();
        assert!(wm.compress("u1").await.unwrap().is_none());

        wm.add_turn("u1", Turn::new(Role::User, "what's the weather", "cli"))
            .await
            .unwrap();
        wm.add_turn("u1", Turn::new(Role::Assistant, "sunny", "telegram"))
            .await
            .unwrap();

        let summary = wm.compress("u1").await.unwrap().unwrap();
        assert!(summary.contains("2 turns"));
        assert!(summary.contains("cli, telegram"));
        assert!(summary.contains("- user: what's the weather"));
        assert!(summary.contains("- assistant: sunny"));
        assert_eq!(wm.get_turns("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn flush_returns_and_clears() {
        let wm = InMemoryWorkingMemory::default();
        wm.add_turn("u1", Turn::new(Role::User, "a", "cli")).await.unwrap();
        let flushed = wm.flush("u1").await.unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(wm.get_turns("u1").await.unwrap().is_empty());
        assert!(wm.flush("u1").await.unwrap().is_empty());
    }

    #[test]
    fn clip_adds_ellipsis() {
        assert_eq!(clip("abcdef", 3), "abc…");
        assert_eq!(clip(" abc ", 3), "abc");
    }
}
