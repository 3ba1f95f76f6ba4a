//! Socket keepalive
//!
//! The producer sends a WebSocket ping every `interval`; the consumer
//! records every pong. A session whose last ping has gone unanswered for
//! longer than `pong_timeout` is considered half-open and torn down.
//!
//! Timestamps are stored as milliseconds since an internal epoch (offset
//! by one so zero means "never") to allow lock-free sharing between the
//! consumer and producer tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Ping interval and pong timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(15),
        }
    }
}

/// Tracks pong responses to detect dead connections
#[derive(Debug)]
pub struct PongTracker {
    epoch: Instant,
    last_ping_sent_ms: AtomicU64,
    last_pong_received_ms: AtomicU64,
    timeout: Duration,
}

impl PongTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_ping_sent_ms: AtomicU64::new(0),
            last_pong_received_ms: AtomicU64::new(0),
            timeout,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    pub fn record_ping_sent(&self) {
        self.last_ping_sent_ms.store(self.now_ms(), Ordering::Release);
    }

    pub fn record_pong_received(&self) {
        self.last_pong_received_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Healthy unless a ping has been outstanding for longer than the timeout
    pub fn is_healthy(&self) -> bool {
        let ping_ms = self.last_ping_sent_ms.load(Ordering::Acquire);
        let pong_ms = self.last_pong_received_ms.load(Ordering::Acquire);

        if ping_ms == 0 || pong_ms >= ping_ms {
            return true;
        }

        let since_ping_ms = self.now_ms().saturating_sub(ping_ms);
        since_ping_ms < self.timeout.as_millis() as u64
    }

    /// Time since last pong; `None` if none was ever received
    pub fn time_since_last_pong(&self) -> Option<Duration> {
        let pong_ms = self.last_pong_received_ms.load(Ordering::Acquire);
        if pong_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(self.now_ms().saturating_sub(pong_ms)))
    }
}
