//! Outbound event queue shared by every session of one transport
//!
//! Unbounded: `send` never blocks. The queue outlives the sockets, so an
//! invocation queued while disconnected is written by the next session's
//! producer. Invocations still queued when a session ends are discarded
//! together with that session's pending ids. A `Close` event is the poison
//! pill that wakes a producer waiting on an empty queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Event consumed by the producer loop
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Encoded text to write to the socket
    Invoke(String),
    /// Stop the producer
    Close,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    events: Mutex<VecDeque<OutboundEvent>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: OutboundEvent) {
        self.events.lock().push_back(event);
        self.notify.notify_one();
    }

    /// Drop every queued invocation, keeping a pending `Close`
    ///
    /// Returns how many invocations were dropped.
    pub fn discard_invocations(&self) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|event| matches!(event, OutboundEvent::Close));
        before - events.len()
    }

    pub fn try_pop(&self) -> Option<OutboundEvent> {
        self.events.lock().pop_front()
    }

    /// Wait for the next event
    ///
    /// Cancel-safe: an event is only removed when this future completes.
    pub async fn pop(&self) -> OutboundEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pop_preserves_fifo_order() {
        let queue = OutboundQueue::new();
        queue.push(OutboundEvent::Invoke("a".into()));
        queue.push(OutboundEvent::Invoke("b".into()));

        assert_eq!(queue.pop().await, OutboundEvent::Invoke("a".into()));
        assert_eq!(queue.pop().await, OutboundEvent::Invoke("b".into()));
        assert!(queue.is_empty());
    }

    #[test]
    fn discarding_invocations_keeps_close() {
        let queue = OutboundQueue::new();
        queue.push(OutboundEvent::Invoke("a".into()));
        queue.push(OutboundEvent::Close);
        queue.push(OutboundEvent::Invoke("b".into()));

        assert_eq!(queue.discard_invocations(), 2);
        assert_eq!(queue.try_pop(), Some(OutboundEvent::Close));
        assert!(queue.is_empty());
        assert_eq!(queue.discard_invocations(), 0);
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_pop() {
        let queue = Arc::new(OutboundQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(OutboundEvent::Close);

        let event = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should wake up")
            .unwrap();
        assert_eq!(event, OutboundEvent::Close);
    }
}
