//! Session watchdog
//!
//! Two independent policies, both evaluated only while a session is
//! started:
//!
//! - **startup**: no message at all within `startup_timeout` of the
//!   session starting ends the whole client
//! - **stall**: after the first message, silence longer than
//!   `stall_threshold` forces a new session (once per session)
//!
//! A zero duration disables the corresponding policy.

use crate::error::{HubError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Per-session activity timestamps
///
/// Written by the transport (session start) and the inbound path (every
/// message), read by the [`Supervisor`].
#[derive(Debug)]
pub struct LivenessTracker {
    epoch: Instant,
    session_id: AtomicU64,
    session_started_ms: AtomicU64,
    last_message_ms: AtomicU64,
    has_received: AtomicBool,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            session_id: AtomicU64::new(0),
            session_started_ms: AtomicU64::new(0),
            last_message_ms: AtomicU64::new(0),
            has_received: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Reset for a fresh session; must happen before the session is
    /// reported as started
    pub fn on_session_start(&self, session_id: u64) {
        let now = self.now_ms();
        self.has_received.store(false, Ordering::Release);
        self.session_started_ms.store(now, Ordering::Release);
        self.last_message_ms.store(now, Ordering::Release);
        self.session_id.store(session_id, Ordering::Release);
    }

    pub fn record_message(&self) {
        self.last_message_ms.store(self.now_ms(), Ordering::Release);
        self.has_received.store(true, Ordering::Release);
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn has_received_message(&self) -> bool {
        self.has_received.load(Ordering::Acquire)
    }

    pub fn since_session_start(&self) -> Duration {
        let started = self.session_started_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(started))
    }

    pub fn since_last_message(&self) -> Duration {
        let last = self.last_message_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Whether the current session is younger than `grace`
    pub fn in_grace_window(&self, grace: Duration) -> bool {
        self.since_session_start() < grace
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// What the supervisor needs from a connection
pub trait SessionControl: Send + Sync {
    fn is_started(&self) -> bool;

    fn liveness(&self) -> &LivenessTracker;

    /// Tear the current session down and let the transport reconnect
    fn restart_session(&self);
}

/// Watchdog thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub startup_timeout: Duration,
    pub stall_threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    StartupTimeout,
    Stalled,
}

/// Why the supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// No data arrived within the startup timeout; the exit token was cancelled
    StartupTimeout,
    /// The exit token was cancelled by someone else
    Cancelled,
}

pub struct Supervisor {
    config: SupervisorConfig,
    control: Arc<dyn SessionControl>,
    exit: CancellationToken,
}

impl Supervisor {
    /// Fails when `poll_interval` is zero
    pub fn new(
        config: SupervisorConfig,
        control: Arc<dyn SessionControl>,
        exit: CancellationToken,
    ) -> Result<Self> {
        if config.poll_interval.is_zero() {
            return Err(HubError::Configuration(
                "supervisor poll interval must be greater than 0".into(),
            ));
        }
        Ok(Self {
            config,
            control,
            exit,
        })
    }

    pub fn evaluate(&self) -> Verdict {
        if !self.control.is_started() {
            return Verdict::Healthy;
        }
        let liveness = self.control.liveness();

        if !liveness.has_received_message() {
            let timeout = self.config.startup_timeout;
            if !timeout.is_zero() && liveness.since_session_start() > timeout {
                return Verdict::StartupTimeout;
            }
            return Verdict::Healthy;
        }

        let threshold = self.config.stall_threshold;
        if !threshold.is_zero() && liveness.since_last_message() > threshold {
            return Verdict::Stalled;
        }
        Verdict::Healthy
    }

    pub async fn run(self) -> SupervisorExit {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut restarted_session: Option<u64> = None;

        loop {
            tokio::select! {
                _ = self.exit.cancelled() => {
                    debug!("Supervisor cancelled");
                    return SupervisorExit::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            match self.evaluate() {
                Verdict::Healthy => {}
                Verdict::StartupTimeout => {
                    error!(
                        "No data received within {:?} of connecting, giving up",
                        self.config.startup_timeout
                    );
                    self.exit.cancel();
                    return SupervisorExit::StartupTimeout;
                }
                Verdict::Stalled => {
                    let session = self.control.liveness().session_id();
                    if restarted_session != Some(session) {
                        warn!(
                            session,
                            silence = ?self.control.liveness().since_last_message(),
                            "Feed stalled, restarting session"
                        );
                        restarted_session = Some(session);
                        self.control.restart_session();
                    }
                }
            }
        }
    }
}
