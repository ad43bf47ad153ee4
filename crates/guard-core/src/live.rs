//! LiveMonitor: short-lived buffer of recent transcripts for the admin view.
//!
//! Events older than the display window are purged; nothing here is persisted.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BROADCAST_CAPACITY: usize = 64;
const MAX_BUFFERED: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub toxic: bool,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            received_at,
            toxic: false,
        }
    }
}

pub struct LiveMonitor {
    window: Duration,
    buffer: Mutex<VecDeque<TranscriptEvent>>,
    tx: broadcast::Sender<TranscriptEvent>,
    clock: Arc<dyn Clock>,
}

impl LiveMonitor {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            window,
            buffer: Mutex::new(VecDeque::new()),
            tx,
            clock,
        }
    }

    pub fn record(&self, event: TranscriptEvent) {
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push_back(event.clone());
            while buffer.len() > MAX_BUFFERED {
                buffer.pop_front();
            }
        }
        self.purge_expired();
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Events still inside the window, oldest first.
    pub fn snapshot(&self) -> Vec<TranscriptEvent> {
        self.purge_expired();
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.tx.subscribe()
    }

    /// Drop events older than the window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.window;
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buffer.len();
        while buffer.front().is_some_and(|e| e.received_at < cutoff) {
            buffer.pop_front();
        }
        before - buffer.len()
    }

    /// Periodic purge until cancelled.
    pub fn spawn_purge(
        self: Arc<Self>,
        every: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            debug!(removed, "[LIVE] purged expired transcripts");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn window_bounds_snapshot() {
        let clock = Arc::new(ManualClock::new());
        let monitor = LiveMonitor::new(Duration::seconds(60), clock.clone());
        monitor.record(TranscriptEvent::new("first", clock.now()));
        clock.advance(Duration::seconds(45));
        monitor.record(TranscriptEvent::new("second", clock.now()));
        assert_eq!(monitor.snapshot().len(), 2);

        clock.advance(Duration::seconds(30));
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text, "second");
    }

    #[tokio::test]
    async fn subscribers_receive_new_events() {
        let clock = Arc::new(ManualClock::new());
        let monitor = LiveMonitor::new(Duration::seconds(60), clock.clone());
        let mut rx = monitor.subscribe();
        monitor.record(TranscriptEvent::new("hello", clock.now()));
        assert_eq!(rx.recv().await.unwrap().text, "hello");
    }
}
