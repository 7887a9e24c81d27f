//! Outbound message queue.
//!
//! Buffers messages sent while no session is open and drains them, in FIFO
//! order, when the next session opens. Identical `(action, payload)` pairs
//! are coalesced into one entry whose retry count grows; entries are dropped
//! once they reach the retry limit or outlive the expiry window.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::websocket::config::WebSocketConfig;
use crate::websocket::types::WsFrame;

/// A message waiting for an open session.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub action: String,
    pub payload: Value,
    /// Time of the most recent enqueue (refreshed on coalescing)
    pub enqueued_at: Instant,
    pub retry_count: u32,
    identity: String,
}

impl QueuedMessage {
    /// The wire frame for this entry
    pub fn to_frame(&self) -> WsFrame {
        WsFrame::new(self.action.clone(), self.payload.clone())
    }
}

/// Result of [`OutboundQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New entry appended
    Appended,
    /// Merged into an identical entry
    Coalesced { retry_count: u32 },
    /// Merged entry reached the retry limit and was dropped
    RetryLimitReached,
}

/// Result of [`OutboundQueue::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub evicted: usize,
    pub remaining: usize,
}

/// FIFO buffer of outbound messages with coalescing and eviction.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
    max_retries: u32,
    expiry: Duration,
    max_len: usize,
}

impl OutboundQueue {
    /// Create a queue with explicit limits
    pub fn new(max_retries: u32, expiry: Duration, max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_retries,
            expiry,
            max_len: max_len.max(1),
        }
    }

    /// Create a queue using the limits in `config`
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(
            config.max_message_retries,
            config.queue_expiry(),
            config.max_queue_len,
        )
    }

    /// Buffer a message, coalescing with an identical pending entry.
    pub fn enqueue(&mut self, action: &str, payload: Value, now: Instant) -> EnqueueOutcome {
        let identity = identity_of(action, &payload);

        if let Some(index) = self.entries.iter().position(|e| e.identity == identity) {
            let retry_count = match self.entries.get_mut(index) {
                Some(entry) => {
                    entry.enqueued_at = now;
                    entry.retry_count += 1;
                    entry.retry_count
                }
                None => 0,
            };

            if retry_count >= self.max_retries {
                tracing::warn!(
                    "Dropping queued '{}' message after {} retries",
                    action,
                    retry_count
                );
                self.entries.remove(index);
                return EnqueueOutcome::RetryLimitReached;
            }

            tracing::debug!("Coalesced queued '{}' message (retry {})", action, retry_count);
            return EnqueueOutcome::Coalesced { retry_count };
        }

        self.entries.push_back(QueuedMessage {
            action: action.to_string(),
            payload,
            enqueued_at: now,
            retry_count: 0,
            identity,
        });

        while self.entries.len() > self.max_len {
            if let Some(dropped) = self.entries.pop_front() {
                tracing::warn!(
                    "Outbound queue full ({}), evicting oldest '{}' message",
                    self.max_len,
                    dropped.action
                );
            }
        }

        tracing::debug!("Queued '{}' message, queue size {}", action, self.entries.len());
        EnqueueOutcome::Appended
    }

    /// Drop entries that are expired or at the retry limit. Returns the
    /// number of entries removed.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let expiry = self.expiry;
        let max_retries = self.max_retries;
        self.entries.retain(|e| {
            now.saturating_duration_since(e.enqueued_at) < expiry && e.retry_count < max_retries
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::info!("Evicted {} stale queued message(s)", evicted);
        }
        evicted
    }

    /// Evict stale entries, then hand the rest to `send` front to back.
    ///
    /// An entry is removed only when `send` returns `true`. The first `false`
    /// stops the drain and leaves that entry and everything behind it queued.
    pub fn drain<F>(&mut self, now: Instant, mut send: F) -> DrainReport
    where
        F: FnMut(&QueuedMessage) -> bool,
    {
        let evicted = self.evict_stale(now);
        let mut sent = 0;

        while let Some(front) = self.entries.front() {
            if !send(front) {
                break;
            }
            self.entries.pop_front();
            sent += 1;
        }

        if sent > 0 {
            tracing::info!("Flushed {} queued message(s)", sent);
        }

        DrainReport {
            sent,
            evicted,
            remaining: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }
}

/// De-duplication key: action plus serialized payload.
fn identity_of(action: &str, payload: &Value) -> String {
    format!("{}\u{0}{}", action, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> OutboundQueue {
        OutboundQueue::new(3, Duration::from_secs(60), 100)
    }

    #[test]
    fn test_enqueue_appends_in_order() {
        let now = Instant::now();
        let mut q = queue();
        assert_eq!(q.enqueue("a", json!(1), now), EnqueueOutcome::Appended);
        assert_eq!(q.enqueue("b", json!(2), now), EnqueueOutcome::Appended);
        let actions: Vec<_> = q.iter().map(|m| m.action.as_str()).collect();
        assert_eq!(actions, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_is_coalesced() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);
        let mut q = queue();
        q.enqueue("ping_test", json!({"n": 1}), t0);
        let outcome = q.enqueue("ping_test", json!({"n": 1}), t1);

        assert_eq!(outcome, EnqueueOutcome::Coalesced { retry_count: 1 });
        assert_eq!(q.len(), 1);
        let entry = q.iter().next().unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.enqueued_at, t1);
    }

    #[test]
    fn test_same_action_different_payload_not_coalesced() {
        let now = Instant::now();
        let mut q = queue();
        q.enqueue("order", json!({"id": 1}), now);
        q.enqueue("order", json!({"id": 2}), now);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_coalescing_to_retry_limit_drops_entry() {
        let now = Instant::now();
        let mut q = queue();
        q.enqueue("x", json!(null), now);
        q.enqueue("x", json!(null), now);
        q.enqueue("x", json!(null), now);
        let outcome = q.enqueue("x", json!(null), now);
        assert_eq!(outcome, EnqueueOutcome::RetryLimitReached);
        assert!(q.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let now = Instant::now();
        let mut q = OutboundQueue::new(3, Duration::from_secs(60), 2);
        q.enqueue("first", json!(1), now);
        q.enqueue("second", json!(2), now);
        q.enqueue("third", json!(3), now);
        let actions: Vec<_> = q.iter().map(|m| m.action.clone()).collect();
        assert_eq!(actions, vec!["second", "third"]);
    }

    #[test]
    fn test_expired_entry_never_delivered() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue("old", json!(1), t0);
        q.enqueue("fresh", json!(2), t0 + Duration::from_secs(30));

        let mut delivered = Vec::new();
        let report = q.drain(t0 + Duration::from_secs(60), |m| {
            delivered.push(m.action.clone());
            true
        });

        assert_eq!(delivered, vec!["fresh"]);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 0);
    }

    #[test]
    fn test_drain_stops_when_send_fails() {
        let now = Instant::now();
        let mut q = queue();
        q.enqueue("a", json!(1), now);
        q.enqueue("b", json!(2), now);
        q.enqueue("c", json!(3), now);

        let mut budget = 1;
        let report = q.drain(now, |_| {
            if budget == 0 {
                return false;
            }
            budget -= 1;
            true
        });

        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(q.iter().next().unwrap().action, "b");
    }

    #[test]
    fn test_frame_from_entry() {
        let mut q = queue();
        q.enqueue("ping_test", json!({"n": 1}), Instant::now());
        let frame = q.iter().next().unwrap().to_frame();
        assert_eq!(frame.to_json().unwrap(), r#"{"action":"ping_test","data":{"n":1}}"#);
    }
}
