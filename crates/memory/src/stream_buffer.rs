//! In-memory stream buffer — a FIFO of raw events with a single read cursor.

use async_trait::async_trait;
use mnemo_core::error::MemoryError;
use mnemo_core::health::ComponentHealth;
use mnemo_core::memory::{StreamBuffer, StreamEvent};
use std::collections::VecDeque;
use tokio::sync::Mutex;

struct Inner {
    /// `(sequence, event)` in push order.
    events: VecDeque<(u64, StreamEvent)>,
    next_seq: u64,
    /// Sequence number of the next event `consume` may return.
    cursor: u64,
}

pub struct InMemoryStreamBuffer {
    inner: Mutex<Inner>,
}

impl InMemoryStreamBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                next_seq: 0,
                cursor: 0,
            }),
        }
    }
}

impl Default for InMemoryStreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamBuffer for InMemoryStreamBuffer {
    async fn push(&self, mut event: StreamEvent) -> Result<String, MemoryError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        event.id = format!("{}-{}", event.timestamp.timestamp_millis(), seq);
        let id = event.id.clone();
        inner.events.push_back((seq, event));
        Ok(id)
    }

    async fn consume(&self, count: usize) -> Result<Vec<StreamEvent>, MemoryError> {
        let mut inner = self.inner.lock().await;
        let cursor = inner.cursor;
        let batch: Vec<(u64, StreamEvent)> = inner
            .events
            .iter()
            .filter(|(seq, _)| *seq >= cursor)
            .take(count)
            .cloned()
            .collect();
        if let Some((last, _)) = batch.last() {
            inner.cursor = last + 1;
        }
        Ok(batch.into_iter().map(|(_, e)| e).collect())
    }

    async fn recent(&self, user_id: &str, count: usize) -> Result<Vec<StreamEvent>, MemoryError> {
        let inner = self.inner.lock().await;
        let mut newest: Vec<StreamEvent> = inner
            .events
            .iter()
            .rev()
            .filter(|(_, e)| e.user_id == user_id)
            .take(count)
            .map(|(_, e)| e.clone())
            .collect();
        newest.reverse();
        Ok(newest)
    }

    async fn trim(&self, max_len: usize) -> Result<usize, MemoryError> {
        let mut inner = self.inner.lock().await;
        let excess = inner.events.len().saturating_sub(max_len);
        inner.events.drain(..excess);
        Ok(excess)
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.inner.lock().await.events.len())
    }

    async fn health_check(&self) -> Result<ComponentHealth, MemoryError> {
        let start = std::time::Instant::now();
        let len = self.inner.lock().await.events.len();
        let health = ComponentHealth::healthy().with_latency(start.elapsed());
        tracing::trace!(len, "Stream buffer health check");
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, content: &str) -> StreamEvent {
        StreamEvent::new("message", user, "cli", content)
    }

    #[tokio::test]
    async fn push_assigns_ids_in_order() {
        let buf = InMemoryStreamBuffer::new();
        let a = buf.push(event("u1", "a")).await.unwrap();
        let b = buf.push(event("u1", "b")).await.unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("-0"));
        assert!(b.ends_with("-1"));
        assert_eq!(buf.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn consume_is_fifo_and_finite() {
        let buf = InMemoryStreamBuffer::new();
        for c in ["a", "b", "c"] {
            buf.push(event("u1", c)).await.unwrap();
        }
        let first = buf.consume(2).await.unwrap();
        assert_eq!(
            first.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let rest = buf.consume(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "c");
        assert!(buf.consume(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trimmed_events_are_never_consumed() {
        let buf = InMemoryStreamBuffer::new();
        for c in ["a", "b", "c", "d"] {
            buf.push(event("u1", c)).await.unwrap();
        }
        assert_eq!(buf.trim(2).await.unwrap(), 2);
        let got = buf.consume(10).await.unwrap();
        assert_eq!(
            got.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
    }

    #[tokio::test]
    async fn trim_below_len_is_noop() {
        let buf = InMemoryStreamBuffer::new();
        buf.push(event("u1", "a")).await.unwrap();
        assert_eq!(buf.trim(10).await.unwrap(), 0);
        assert_eq!(buf.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_filters_by_user_oldest_first() {
        let buf = InMemoryStreamBuffer::new();
        buf.push(event("u1", "a")).await.unwrap();
        buf.push(event("u2", "x")).await.unwrap();
        buf.push(event("u1", "b")).await.unwrap();
        buf.push(event("u1", "c")).await.unwrap();

        let recent = buf.recent("u1", 2).await.unwrap();
        assert_eq!(
            recent.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        // recent does not move the cursor
        assert_eq!(buf.consume(10).await.unwrap().len(), 4);
    }
}
