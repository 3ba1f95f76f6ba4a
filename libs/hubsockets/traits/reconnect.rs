use std::time::Duration;

/// Trait for defining reconnection strategies
///
/// The transport loop never gives up on its own: a strategy only decides
/// how long to wait before the next attempt. Stopping is done via
/// `Connection::close()`.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Arguments
    /// * `attempt` - Consecutive failed attempts so far (0-indexed, reset
    ///   after every session that reached the running state)
    fn next_delay(&self, attempt: usize) -> Duration;
}

/// Fixed delay reconnection strategy
///
/// Always waits the same amount of time between reconnection attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, _attempt: usize) -> Duration {
        self.delay
    }
}

/// Exponential backoff reconnection strategy
///
/// Delays between reconnection attempts grow exponentially:
/// initial_delay * 2^attempt, capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: usize) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32) as u32);
        let delay = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}
