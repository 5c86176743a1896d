//! Event hub: bounded in-memory log buffer with broadcast fan-out.
//!
//! Entries live in a fixed-capacity ring; the oldest entry is evicted when
//! the buffer is full. Appends are broadcast to all live subscribers without
//! blocking on a slow one; a lagging subscriber drops entries rather than
//! stalling the publisher.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Immutable log record owned by the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<String>,
}

/// Message delivered to hub subscribers
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A new entry was appended
    Entry(LogEntry),
    /// The buffer was atomically emptied
    Cleared,
}

/// Bounded, thread-safe log buffer with broadcast delivery
pub struct EventHub {
    capacity: usize,
    buffer: Mutex<VecDeque<LogEntry>>,
    sender: broadcast::Sender<LogEvent>,
}

impl EventHub {
    /// Create a hub holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            sender,
        }
    }

    /// Append an entry, evicting the oldest if the buffer is full, and
    /// broadcast it to subscribers.
    ///
    /// The broadcast happens under the buffer lock so the event stream is
    /// ordered identically to the buffer mutations; sends never block.
    pub fn append(&self, level: LogLevel, message: impl Into<String>, details: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        };
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
        // Send fails only when there are no subscribers
        let _ = self.sender.send(LogEvent::Entry(entry));
    }

    pub fn debug(&self, message: impl Into<String>, details: Option<String>) {
        self.append(LogLevel::Debug, message, details);
    }

    pub fn info(&self, message: impl Into<String>, details: Option<String>) {
        self.append(LogLevel::Info, message, details);
    }

    pub fn warn(&self, message: impl Into<String>, details: Option<String>) {
        self.append(LogLevel::Warn, message, details);
    }

    pub fn error(&self, message: impl Into<String>, details: Option<String>) {
        self.append(LogLevel::Error, message, details);
    }

    /// Immutable snapshot copy of the buffer, oldest first
    pub fn get_all(&self) -> Vec<LogEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Atomically empty the buffer and notify subscribers of the reset.
    /// Sent under the buffer lock, so no concurrently appended entry can be
    /// delivered before the reset while surviving it.
    pub fn clear(&self) {
        let mut buffer = self.buffer.lock();
        buffer.clear();
        let _ = self.sender.send(LogEvent::Cleared);
    }

    /// Register a new subscriber. Dropping the receiver deregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let hub = EventHub::new(100);
        for i in 0..101 {
            hub.info(format!("entry {i}"), None);
        }
        let all = hub.get_all();
        assert_eq!(all.len(), 100);
        // The 101st append evicted entry 0; FIFO order preserved
        assert_eq!(all[0].message, "entry 1");
        assert_eq!(all[99].message, "entry 100");
    }

    #[test]
    fn test_get_all_is_snapshot() {
        let hub = EventHub::new(10);
        hub.info("first", None);
        let snapshot = hub.get_all();
        hub.info("second", None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(hub.get_all().len(), 2);
    }

    #[test]
    fn test_clear_empties_and_notifies() {
        let hub = EventHub::new(10);
        let mut rx = hub.subscribe();
        hub.info("before clear", None);
        hub.clear();
        assert!(hub.get_all().is_empty());

        assert!(matches!(rx.try_recv(), Ok(LogEvent::Entry(_))));
        assert!(matches!(rx.try_recv(), Ok(LogEvent::Cleared)));
    }

    #[test]
    fn test_event_stream_replay_matches_buffer() {
        use std::sync::Arc;

        let hub = Arc::new(EventHub::new(1000));
        let mut rx = hub.subscribe();

        let appender = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    hub.info(format!("entry {i}"), None);
                }
            })
        };
        for _ in 0..20 {
            hub.clear();
            std::thread::sleep(std::time::Duration::from_micros(100));
        }
        appender.join().unwrap();

        // Folding the delivered event stream must reproduce the buffer:
        // an entry appended concurrently with a clear either survives it
        // and arrives after Cleared, or is evicted and arrives before.
        let mut replica = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                LogEvent::Entry(entry) => replica.push(entry.message),
                LogEvent::Cleared => replica.clear(),
            }
        }
        let buffer: Vec<String> = hub.get_all().into_iter().map(|e| e.message).collect();
        assert_eq!(replica, buffer);
    }

    #[tokio::test]
    async fn test_subscriber_receives_appends() {
        let hub = EventHub::new(10);
        let mut rx = hub.subscribe();
        hub.warn("disk low", Some("5GB remaining".into()));

        match rx.recv().await {
            Ok(LogEvent::Entry(entry)) => {
                assert_eq!(entry.level, LogLevel::Warn);
                assert_eq!(entry.message, "disk low");
                assert_eq!(entry.details.as_deref(), Some("5GB remaining"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
