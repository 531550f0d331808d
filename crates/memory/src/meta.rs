//! In-memory meta memory — which memories get matched, how often, from where.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mnemo_core::clock::{Clock, SystemClock};
use mnemo_core::error::MemoryError;
use mnemo_core::memory::{AccessPattern, HotMemory, MetaMemory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct AccessStats {
    count: u64,
    channels: HashSet<String>,
    last_accessed: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    patterns: Vec<AccessPattern>,
    stats: HashMap<String, AccessStats>,
}

impl Inner {
    fn apply(&mut self, pattern: &AccessPattern) {
        for id in &pattern.memory_ids {
            let entry = self.stats.entry(id.clone()).or_insert_with(|| AccessStats {
                count: 0,
                channels: HashSet::new(),
                last_accessed: pattern.timestamp,
            });
            entry.count += 1;
            entry.channels.insert(pattern.channel_id.clone());
            entry.last_accessed = entry.last_accessed.max(pattern.timestamp);
        }
    }

    fn rebuild(&mut self) {
        self.stats.clear();
        let patterns = std::mem::take(&mut self.patterns);
        for p in &patterns {
            self.apply(p);
        }
        self.patterns = patterns;
    }
}

pub struct InMemoryMetaMemory {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryMetaMemory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for InMemoryMetaMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaMemory for InMemoryMetaMemory {
    async fn record_access(&self, pattern: AccessPattern) -> Result<(), MemoryError> {
        if pattern.memory_ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        inner.apply(&pattern);
        inner.patterns.push(pattern);
        Ok(())
    }

    async fn get_hot_memories(&self, limit: usize) -> Result<Vec<HotMemory>, MemoryError> {
        let inner = self.inner.read().await;
        let mut hot: Vec<HotMemory> = inner
            .stats
            .iter()
            .map(|(id, s)| HotMemory {
                memory_id: id.clone(),
                access_count: s.count,
                channel_count: s.channels.len(),
                last_accessed: s.last_accessed,
            })
            .collect();
        hot.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.channel_count.cmp(&a.channel_count))
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        hot.truncate(limit);
        Ok(hot)
    }

    async fn get_prefetch_candidates(
        &self,
        user_id: &str,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for pattern in inner.patterns.iter().rev() {
            if pattern.user_id != user_id || pattern.channel_id != channel_id {
                continue;
            }
            for id in &pattern.memory_ids {
                if out.len() >= limit {
                    return Ok(out);
                }
                if seen.insert(id.as_str()) {
                    out.push(id.clone());
                }
            }
        }
        Ok(out)
    }

    async fn prune_old_patterns(&self, days: u32) -> Result<usize, MemoryError> {
        let cutoff = self.clock.now() - Duration::days(days as i64);
        let mut inner = self.inner.write().await;
        let before = inner.patterns.len();
        inner.patterns.retain(|p| p.timestamp >= cutoff);
        let removed = before - inner.patterns.len();
        if removed > 0 {
            inner.rebuild();
        }
        Ok(removed)
    }
}
