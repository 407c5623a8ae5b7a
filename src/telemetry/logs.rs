// Log fan-out
//
// Every published line gets the next sequence number and is pushed to each
// live subscriber's unbounded queue. Publishing never waits on a subscriber;
// a dropped subscription is pruned on the next publish.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// One line of job or daemon output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub sequence: u64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

struct LogInner {
    next_sequence: u64,
    subscribers: Vec<mpsc::UnboundedSender<LogEvent>>,
    recent: VecDeque<LogEvent>,
    window: usize,
}

/// Append-only, ordered log distribution to any number of viewers
pub struct LogStream {
    inner: Mutex<LogInner>,
}

impl LogStream {
    /// Create a stream keeping the last `window` events for late viewers
    pub fn new(window: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                next_sequence: 1,
                subscribers: Vec::new(),
                recent: VecDeque::with_capacity(window.min(4096)),
                window,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a line; returns its sequence number
    pub fn publish(&self, text: impl Into<String>) -> u64 {
        let text = text.into();
        let text = text.trim_end_matches(['\r', '\n']).to_string();

        let mut inner = self.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let event = LogEvent {
            sequence,
            text,
            timestamp: Utc::now(),
        };

        if inner.window > 0 {
            if inner.recent.len() >= inner.window {
                inner.recent.pop_front();
            }
            inner.recent.push_back(event.clone());
        }

        // Sending under the lock keeps every subscriber's view in sequence order
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());

        sequence
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> LogSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.subscribers.push(tx);
        LogSubscription { rx }
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEvent> {
        let inner = self.lock();
        let skip = inner.recent.len().saturating_sub(limit);
        inner.recent.iter().skip(skip).cloned().collect()
    }

    /// Live subscriptions (closed ones are pruned first)
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Sequence number the next event will get
    pub fn next_sequence(&self) -> u64 {
        self.lock().next_sequence
    }
}

/// A viewer's handle on the log stream; dropping it unsubscribes
pub struct LogSubscription {
    rx: mpsc::UnboundedReceiver<LogEvent>,
}

impl LogSubscription {
    /// Next event, or `None` once the stream is gone
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; queued events are discarded
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn into_stream(self) -> impl Stream<Item = LogEvent> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscriber_sees_events_after_subscribing_in_order() {
        let logs = LogStream::new(10);
        logs.publish("before");

        let mut sub = logs.subscribe();
        for i in 0..5 {
            logs.publish(format!("line {}", i));
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(sub.recv().await.unwrap());
        }
        assert_eq!(seen[0].text, "line 0");
        assert!(seen.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let logs = LogStream::new(0);
        let mut keep = logs.subscribe();
        let dropped = logs.subscribe();
        assert_eq!(logs.subscriber_count(), 2);

        drop(dropped);
        logs.publish("still flowing");
        assert_eq!(logs.subscriber_count(), 1);
        assert_eq!(keep.recv().await.unwrap().text, "still flowing");
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_publisher() {
        let logs = LogStream::new(0);
        let sub = logs.subscribe();
        for i in 0..10_000 {
            logs.publish(format!("{}", i));
        }

        let events: Vec<_> = sub.into_stream().take(10_000).collect().await;
        assert_eq!(events.len(), 10_000);
        assert_eq!(events.last().unwrap().text, "9999");
    }

    #[test]
    fn test_recent_window() {
        let logs = LogStream::new(3);
        for i in 0..5 {
            logs.publish(format!("{}\n", i));
        }
        let recent: Vec<_> = logs.recent(10).into_iter().map(|e| e.text).collect();
        assert_eq!(recent, vec!["2", "3", "4"]);
        assert_eq!(logs.recent(1)[0].text, "4");
        assert_eq!(logs.next_sequence(), 6);
    }

    #[tokio::test]
    async fn test_closed_subscription_is_pruned() {
        let logs = LogStream::new(0);
        let mut sub = logs.subscribe();
        sub.close();
        logs.publish("x");
        assert_eq!(logs.subscriber_count(), 0);
    }
}
