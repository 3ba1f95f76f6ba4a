//! Lock-free connection state and counters
//!
//! Both are read from the supervisor and the façade while the transport
//! writes them, so everything is a plain atomic.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Transport session state
///
/// `Disconnected → Negotiating → Connected → Running → Disconnected`,
/// looping until `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Negotiating = 1,
    Connected = 2,
    Running = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Negotiating,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Running,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Atomic wrapper around [`ConnectionState`]
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the state unless it is already `Closed`
    ///
    /// Returns false when the transition was refused.
    pub fn set(&self, state: ConnectionState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == ConnectionState::Closed as u8 {
                return state == ConnectionState::Closed;
            }
            match self.0.compare_exchange_weak(
                current,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self.get(), ConnectionState::Connected | ConnectionState::Running)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.get() == ConnectionState::Closed
    }
}

/// Client metrics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub malformed_frames: u64,
    pub sessions_started: u64,
    pub reconnect_count: u64,
    pub connection_state: ConnectionState,
}

/// Atomic counters behind [`Metrics`]
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    malformed_frames: AtomicU64,
    sessions_started: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session reaching the connected state; returns its 1-based id
    #[inline]
    pub fn increment_sessions(&self) -> u64 {
        self.sessions_started.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Acquire)
    }

    /// Sessions after the first one
    pub fn reconnect_count(&self) -> u64 {
        self.sessions_started().saturating_sub(1)
    }

    pub fn snapshot(&self, state: ConnectionState) -> Metrics {
        Metrics {
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
            malformed_frames: self.malformed_frames(),
            sessions_started: self.sessions_started(),
            reconnect_count: self.reconnect_count(),
            connection_state: state,
        }
    }
}
