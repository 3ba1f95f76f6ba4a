//! One logical connection to a hub endpoint
//!
//! Owns the hubs, the event hooks, the invocation sequence counter and the
//! [`Transport`]. The connection lives across sessions; only the socket is
//! replaced on reconnect.

use crate::core::config::ConnectionConfig;
use crate::core::connection_state::{ConnectionState, Metrics};
use crate::core::event_hook::EventHook;
use crate::core::frame::{Frame, Invocation};
use crate::core::hub::{Hub, PendingInvocations};
use crate::core::supervisor::{LivenessTracker, SessionControl};
use crate::core::transport::Transport;
use crate::error::{HubError, Result};
use crate::traits::HubProtocol;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct Connection {
    url: String,
    protocol: Arc<dyn HubProtocol>,
    hubs: RwLock<Vec<Arc<Hub>>>,
    selected_hub: RwLock<Option<String>>,
    active_hub: Arc<RwLock<Option<String>>>,
    pending: Arc<PendingInvocations>,
    send_counter: AtomicU64,
    started: AtomicBool,
    liveness: LivenessTracker,
    transport: Transport,
    weak_self: Weak<Connection>,

    /// Every decoded inbound frame
    pub received: EventHook<Arc<Frame>>,
    /// Error text carried by inbound frames
    pub error: EventHook<String>,
    /// A session reached the connected state
    pub connected: EventHook<()>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Connection>| {
            let received = EventHook::new("received");

            // Registered before any hub, so errors are reported ahead of dispatch
            let router = weak.clone();
            received.subscribe(move |frame: Arc<Frame>| {
                let router = router.clone();
                async move {
                    if let (Some(message), Some(connection)) =
                        (frame.error_message(), router.upgrade())
                    {
                        connection.error.fire(message.to_string()).await;
                    }
                    Ok(())
                }
            });

            Self {
                url: config.url.clone(),
                protocol: config.protocol.protocol(),
                hubs: RwLock::new(Vec::new()),
                selected_hub: RwLock::new(None),
                active_hub: Arc::new(RwLock::new(None)),
                pending: Arc::new(PendingInvocations::new()),
                send_counter: AtomicU64::new(0),
                started: AtomicBool::new(false),
                liveness: LivenessTracker::new(),
                transport: Transport::new(config),
                weak_self: weak.clone(),
                received,
                error: EventHook::new("error"),
                connected: EventHook::new("connected"),
            }
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> Arc<dyn HubProtocol> {
        Arc::clone(&self.protocol)
    }

    /// Get or create the hub called `name`
    ///
    /// Fails once the connection has started: hub names are part of the
    /// negotiated session.
    pub fn register_hub(&self, name: &str) -> Result<Arc<Hub>> {
        if self.is_started() {
            return Err(HubError::InvalidState(format!(
                "cannot register hub '{}' on a started connection",
                name
            )));
        }

        let mut hubs = self.hubs.write();
        if let Some(hub) = hubs.iter().find(|hub| hub.name == name) {
            return Ok(Arc::clone(hub));
        }

        let hub = Arc::new(Hub::new(
            name,
            self.weak_self.clone(),
            Arc::clone(&self.pending),
            Arc::clone(&self.active_hub),
        ));
        let dispatcher = Arc::clone(&hub);
        self.received.subscribe(move |frame: Arc<Frame>| {
            let hub = Arc::clone(&dispatcher);
            async move {
                hub.client.dispatch(&frame).await;
                Ok(())
            }
        });
        hubs.push(Arc::clone(&hub));
        debug!(hub = name, "Registered hub");
        Ok(hub)
    }

    pub fn hub(&self, name: &str) -> Option<Arc<Hub>> {
        self.hubs.read().iter().find(|hub| hub.name == name).cloned()
    }

    pub fn hub_names(&self) -> Vec<String> {
        self.hubs.read().iter().map(|hub| hub.name.clone()).collect()
    }

    /// Make `name` the hub unnamed (core) traffic is routed to
    pub fn select_hub(&self, name: &str) -> Result<()> {
        if self.hub(name).is_none() {
            return Err(HubError::Configuration(format!("unknown hub '{}'", name)));
        }
        *self.selected_hub.write() = Some(name.to_string());
        Ok(())
    }

    /// The explicitly selected hub, else the first one registered
    pub fn active_hub(&self) -> Option<Arc<Hub>> {
        if let Some(name) = self.selected_hub.read().as_deref() {
            return self.hub(name);
        }
        self.hubs.read().first().cloned()
    }

    /// Run the session loop until [`close`](Self::close)
    pub async fn start(&self) -> Result<()> {
        let hub = self
            .active_hub()
            .ok_or_else(|| HubError::Configuration("no hub has been registered".into()))?;
        *self.active_hub.write() = Some(hub.name.clone());
        info!(url = %self.url, hub = %hub.name, protocol = ?self.protocol.kind(), "Starting connection");
        self.transport.run(self).await
    }

    /// Next invocation id, strictly increasing from 0 across sessions
    pub fn increment_send_counter(&self) -> u64 {
        self.send_counter.fetch_add(1, Ordering::AcqRel)
    }

    /// Encode and enqueue an invocation
    pub fn send(&self, invocation: &Invocation) -> Result<()> {
        let text = self.protocol.encode_invocation(invocation)?;
        self.transport.send(text)
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    /// Report a fresh session as started
    pub(crate) fn begin_session(&self, session_id: u64) {
        self.liveness.on_session_start(session_id);
        self.set_started(true);
    }

    /// Forget the invocations of a session that has ended
    pub(crate) fn end_session(&self) {
        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "Discarding invocations left unanswered by the ended session"
            );
        }
        self.pending.clear();
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn metrics(&self) -> Metrics {
        self.transport.metrics()
    }

    pub fn restart_session(&self) {
        self.transport.restart_session();
    }

    /// Outbound events not yet written
    pub fn queued(&self) -> usize {
        self.transport.queued()
    }
}

impl SessionControl for Connection {
    fn is_started(&self) -> bool {
        Connection::is_started(self)
    }

    fn liveness(&self) -> &LivenessTracker {
        Connection::liveness(self)
    }

    fn restart_session(&self) {
        Connection::restart_session(self)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("protocol", &self.protocol.kind())
            .field("hubs", &self.hub_names())
            .field("started", &self.is_started())
            .field("state", &self.state())
            .finish()
    }
}
