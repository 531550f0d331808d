//! Token counting.
//!
//! Two APIs with different costs:
//!
//! - [`estimate_tokens`]: character-count heuristic, ~3 characters per token,
//!   rounded up. Synchronous and free; the only thing the assembler's hot path
//!   uses.
//! - [`TokenCounter::count`]: the accurate count, reserved for pre-flight
//!   checks. [`CachedTokenCounter`] memoizes it in a bounded LRU keyed by a
//!   content hash and falls back to the estimate when the backend fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_core::clock::{Clock, SystemClock};
use mnemo_core::message::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 3 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(3)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name and delimiters.
pub fn estimate_message_tokens(message: &Message) -> usize {
    4 + estimate_tokens(&message.content)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenCountError {
    #[error("tokenizer unavailable: {0}")]
    Unavailable(String),

    #[error("token count failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Cheap approximation, never fails.
    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Accurate count.
    async fn count(&self, text: &str) -> Result<usize, TokenCountError>;
}

/// A counter whose "accurate" count is the estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

#[async_trait]
impl TokenCounter for HeuristicCounter {
    async fn count(&self, text: &str) -> Result<usize, TokenCountError> {
        Ok(estimate_tokens(text))
    }
}

/// Maps content to a cache key.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, text: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Counts answered by the estimate because the backend failed.
    pub fallbacks: u64,
    pub entries: usize,
}

struct CacheEntry {
    tokens: usize,
    inserted_at: DateTime<Utc>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// last_used tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_used);
            entry.last_used = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.last_used);
        }
    }

    fn insert(&mut self, key: String, tokens: usize, now: DateTime<Utc>, capacity: usize) {
        self.remove(&key);
        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.tick += 1;
        self.recency.insert(self.tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                tokens,
                inserted_at: now,
                last_used: self.tick,
            },
        );
    }
}

/// Bounded LRU cache in front of an accurate counter.
pub struct CachedTokenCounter {
    inner: Arc<dyn TokenCounter>,
    hasher: Arc<dyn ContentHasher>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    ttl: Option<chrono::Duration>,
    state: Mutex<CacheState>,
}

impl CachedTokenCounter {
    pub fn new(inner: Arc<dyn TokenCounter>, capacity: usize) -> Self {
        Self {
            inner,
            hasher: Arc::new(Sha256Hasher),
            clock: Arc::new(SystemClock),
            capacity: capacity.max(1),
            ttl: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn from_config(inner: Arc<dyn TokenCounter>, config: &mnemo_config::TokenCacheConfig) -> Self {
        let counter = Self::new(inner, config.capacity);
        match config.ttl_secs {
            Some(secs) => counter.with_ttl(chrono::Duration::seconds(secs as i64)),
            None => counter,
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<usize> {
        let now = self.clock.now();
        let mut state = self.lock();
        let (tokens, inserted_at) = {
            let entry = state.entries.get(key)?;
            (entry.tokens, entry.inserted_at)
        };
        if self.ttl.is_some_and(|ttl| now - inserted_at > ttl) {
            state.remove(key);
            return None;
        }
        state.touch(key);
        state.stats.hits += 1;
        Some(tokens)
    }
}

#[async_trait]
impl TokenCounter for CachedTokenCounter {
    fn estimate(&self, text: &str) -> usize {
        self.inner.estimate(text)
    }

    async fn count(&self, text: &str) -> Result<usize, TokenCountError> {
        let key = self.hasher.hash(text);
        if let Some(tokens) = self.lookup(&key) {
            return Ok(tokens);
        }
        self.lock().stats.misses += 1;

        match self.inner.count(text).await {
            Ok(tokens) => {
                let now = self.clock.now();
                self.lock().insert(key, tokens, now, self.capacity);
                debug!(tokens, "Token count cached");
                Ok(tokens)
            }
            Err(e) => {
                warn!(error = %e, "Accurate token count failed, using estimate");
                self.lock().stats.fallbacks += 1;
                Ok(self.inner.estimate(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts words and records how often it was asked.
    #[derive(Default)]
    struct WordCounter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenCounter for WordCounter {
        async fn count(&self, text: &str) -> Result<usize, TokenCountError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TokenCountError::Unavailable("offline".into()));
            }
            Ok(text.split_whitespace().count())
        }
    }

    /// Maps everything to the first character, to force collisions.
    struct FirstCharHasher;

    impl ContentHasher for FirstCharHasher {
        fn hash(&self, text: &str) -> String {
            text.chars().take(1).collect()
        }
    }

    #[test]
    fn estimate_rounds_up_per_three_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(300)), 100);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("ééé"), 1);
    }

    #[test]
    fn message_includes_overhead() {
        assert_eq!(estimate_message_tokens(&Message::user("abc")), 5);
    }

    #[test]
    fn sha256_hasher_is_stable_hex() {
        let h = Sha256Hasher.hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, Sha256Hasher.hash("hello"));
        assert_ne!(h, Sha256Hasher.hash("hello!"));
    }

    #[tokio::test]
    async fn repeated_counts_hit_the_cache() {
        let inner = Arc::new(WordCounter::default());
        let cache = CachedTokenCounter::new(inner.clone(), 10);

        assert_eq!(cache.count("one two three").await.unwrap(), 3);
        assert_eq!(cache.count("one two three").await.unwrap(), 3);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let inner = Arc::new(WordCounter::default());
        let cache = CachedTokenCounter::new(inner.clone(), 2);

        cache.count("a").await.unwrap();
        cache.count("b").await.unwrap();
        cache.count("a").await.unwrap(); // a is now newest
        cache.count("c").await.unwrap(); // evicts b
        assert_eq!(cache.stats().entries, 2);

        let before = inner.calls.load(Ordering::SeqCst);
        cache.count("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), before);
        cache.count("b").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let inner = Arc::new(WordCounter::default());
        let cache = CachedTokenCounter::new(inner.clone(), 10)
            .with_clock(clock.clone())
            .with_ttl(chrono::Duration::seconds(60));

        cache.count("x y").await.unwrap();
        clock.advance(chrono::Duration::seconds(30));
        cache.count("x y").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(31));
        cache.count("x y").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_falls_back_to_estimate_and_is_not_cached() {
        let inner = Arc::new(WordCounter {
            fail: true,
            ..Default::default()
        });
        let cache = CachedTokenCounter::new(inner.clone(), 10);

        assert_eq!(cache.count("abcdef").await.unwrap(), 2);
        assert_eq!(cache.count("abcdef").await.unwrap(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().fallbacks, 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn injected_hasher_controls_keys() {
        let inner = Arc::new(WordCounter::default());
        let cache = CachedTokenCounter::new(inner, 10).with_hasher(Arc::new(FirstCharHasher));

        assert_eq!(cache.count("a b c").await.unwrap(), 3);
        // Same key, so the cached value is returned.
        assert_eq!(cache.count("a").await.unwrap(), 3);
    }
}
