//! Reconnecting socket loop
//!
//! Each iteration is one session: negotiate, open the socket, (core)
//! handshake, announce the session, then run the consumer and producer
//! side by side until either finishes. Whichever side finishes first
//! cancels the session token, the other side observes it, and both are
//! joined before the next iteration. At most one socket exists at a time.

use crate::core::config::ConnectionConfig;
use crate::core::connection::Connection;
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
use crate::core::frame::Frame;
use crate::core::keepalive::PongTracker;
use crate::core::negotiate::{Negotiator, SessionParameters};
use crate::core::queue::{OutboundEvent, OutboundQueue};
use crate::error::{HubError, Result};
use crate::traits::HubProtocol;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<Socket, Message>;
type SocketReader = SplitStream<Socket>;

/// Time allowed for a graceful close frame on teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Clears the running flag when `run` returns, however it returns
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Transport {
    config: ConnectionConfig,
    queue: OutboundQueue,
    state: AtomicConnectionState,
    metrics: AtomicMetrics,
    running: AtomicBool,
    closed: AtomicBool,
    close_token: CancellationToken,
    session_token: Mutex<Option<CancellationToken>>,
}

impl Transport {
    pub(crate) fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            queue: OutboundQueue::new(),
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            metrics: AtomicMetrics::new(),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            session_token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot(self.state.get())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events waiting for a producer
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue encoded text for the current or next session
    pub fn send(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(HubError::ChannelSend("transport is closed".into()));
        }
        self.queue.push(OutboundEvent::Invoke(text));
        Ok(())
    }

    /// Stop the loop for good; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing transport");
        self.queue.push(OutboundEvent::Close);
        self.close_token.cancel();
    }

    /// End the current session without closing; the loop reconnects
    pub fn restart_session(&self) {
        if let Some(token) = self.session_token.lock().as_ref() {
            info!("Restarting session");
            token.cancel();
        }
    }

    /// Run sessions until closed
    ///
    /// Returns immediately after `close`. A second concurrent call fails
    /// with [`HubError::InvalidState`].
    pub async fn run(&self, connection: &Connection) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(HubError::InvalidState("transport is already running".into()));
        }
        let _guard = RunGuard(&self.running);

        let negotiator = Negotiator::new(
            self.config.protocol,
            &self.config.url,
            self.config.negotiate_url.clone(),
            connection.hub_names(),
            self.config.http_timeout,
        )?;

        let mut attempt = 0;
        while !self.is_closed() {
            self.state.set(ConnectionState::Negotiating);
            let sessions_before = self.metrics.sessions_started();

            if let Err(e) = self.run_session(connection, &negotiator).await {
                warn!("Session failed: {}", e);
            }

            connection.set_started(false);
            *self.session_token.lock() = None;
            self.state.set(ConnectionState::Disconnected);

            if self.is_closed() {
                break;
            }

            if self.metrics.sessions_started() > sessions_before {
                attempt = 0;
                // Ids of the ended session mean nothing to the next one
                let discarded = self.queue.discard_invocations();
                if discarded > 0 {
                    warn!(count = discarded, "Discarding invocations queued for the ended session");
                }
                connection.end_session();
            }
            let delay = self.config.reconnect_strategy.next_delay(attempt);
            attempt += 1;
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.close_token.cancelled() => break,
            }
        }

        self.state.set(ConnectionState::Closed);
        info!("Transport stopped");
        Ok(())
    }

    async fn run_session(&self, connection: &Connection, negotiator: &Negotiator) -> Result<()> {
        let headers = self.config.headers.get_headers().await;
        let params = tokio::select! {
            params = negotiator.negotiate(headers) => params?,
            _ = self.close_token.cancelled() => return Ok(()),
        };

        info!(url = %params.socket_url, "Opening socket");
        let request = build_request(&params)?;
        let socket = tokio::select! {
            result = connect_async(request) => result?.0,
            _ = self.close_token.cancelled() => return Ok(()),
        };
        let (mut writer, mut reader) = socket.split();

        let protocol = connection.protocol();
        let backlog = match protocol.handshake_request() {
            Some(request) => {
                tokio::select! {
                    result = writer.send(Message::Text(request)) => result?,
                    _ = self.close_token.cancelled() => return Ok(()),
                }
                self.metrics.increment_sent();
                self.await_handshake(&mut reader, connection, protocol.as_ref()).await?
            }
            None => Vec::new(),
        };

        self.state.set(ConnectionState::Connected);
        let session_id = self.metrics.increment_sessions();
        let token = self.close_token.child_token();
        *self.session_token.lock() = Some(token.clone());
        connection.begin_session(session_id);
        info!(session = session_id, "Session connected");

        connection.connected.fire(()).await;
        self.state.set(ConnectionState::Running);

        let tracker = PongTracker::new(self.config.keepalive.pong_timeout);
        let consumer = async {
            let result = self
                .consume(&mut reader, connection, protocol.as_ref(), backlog, &tracker, &token)
                .await;
            token.cancel();
            result
        };
        let producer = async {
            let result = self
                .produce(&mut writer, protocol.as_ref(), &tracker, &token)
                .await;
            token.cancel();
            result
        };
        let (consumed, produced) = tokio::join!(consumer, producer);

        if tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await.is_err() {
            trace!(session = session_id, "Close frame timed out");
        }
        info!(session = session_id, "Session ended");

        consumed.and(produced)
    }

    async fn await_handshake(
        &self,
        reader: &mut SocketReader,
        connection: &Connection,
        protocol: &dyn HubProtocol,
    ) -> Result<Vec<Result<Frame>>> {
        let response = async {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text),
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(HubError::ConnectionClosed(
                            "socket closed during handshake".into(),
                        ))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(HubError::from(e)),
                }
            }
        };

        let text = tokio::select! {
            result = tokio::time::timeout(self.config.handshake_timeout, response) => {
                result.map_err(|_| HubError::Timeout("no handshake response".into()))??
            }
            _ = self.close_token.cancelled() => {
                return Err(HubError::ConnectionClosed("closed during handshake".into()))
            }
        };
        self.metrics.increment_received();

        let (handshake, rest) = protocol.decode_handshake(&text)?;
        if let Some(error) = handshake.error_message() {
            let message = format!("handshake rejected: {}", error);
            connection.error.fire(message.clone()).await;
            return Err(HubError::Protocol(message));
        }
        debug!("Handshake accepted");
        Ok(rest)
    }

    async fn dispatch(&self, connection: &Connection, decoded: Result<Frame>) -> bool {
        match decoded {
            Ok(frame) => {
                if frame.carries_data() {
                    connection.liveness().record_message();
                }
                let close = frame.is_close();
                connection.received.fire(Arc::new(frame)).await;
                close
            }
            Err(e) => {
                self.metrics.increment_malformed();
                warn!("Dropping malformed frame: {}", e);
                false
            }
        }
    }

    /// Read and dispatch frames; a remote close is a normal return
    async fn consume(
        &self,
        reader: &mut SocketReader,
        connection: &Connection,
        protocol: &dyn HubProtocol,
        backlog: Vec<Result<Frame>>,
        tracker: &PongTracker,
        token: &CancellationToken,
    ) -> Result<()> {
        for decoded in backlog {
            if self.dispatch(connection, decoded).await {
                info!("Server closed the session");
                return Ok(());
            }
        }

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                message = reader.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    self.metrics.increment_received();
                    if text.is_empty() {
                        continue;
                    }
                    for decoded in protocol.decode(&text) {
                        if self.dispatch(connection, decoded).await {
                            info!("Server closed the session");
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => tracker.record_pong_received(),
                Some(Ok(Message::Close(frame))) => {
                    info!("Socket closed by server: {:?}", frame);
                    return Ok(());
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    info!("Socket closed");
                    return Ok(());
                }
                Some(Err(e)) => return Err(HubError::from(e)),
            }
        }
    }

    /// Drain the outbound queue and keep the socket alive
    async fn produce(
        &self,
        writer: &mut SocketWriter,
        protocol: &dyn HubProtocol,
        tracker: &PongTracker,
        token: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config.keepalive.interval;
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                event = self.queue.pop() => event,
                _ = keepalive.tick() => {
                    if !tracker.is_healthy() {
                        return Err(HubError::Timeout(format!(
                            "no pong within {:?}",
                            self.config.keepalive.pong_timeout
                        )));
                    }
                    self.write(writer, Message::Ping(Vec::new()), token).await?;
                    tracker.record_ping_sent();
                    if let Some(text) = protocol.keepalive() {
                        self.write(writer, Message::Text(text), token).await?;
                    }
                    continue;
                }
            };

            match event {
                OutboundEvent::Invoke(text) => {
                    if let Err(e) = self.write(writer, Message::Text(text), token).await {
                        warn!("Invocation lost with the session: {}", e);
                        return Err(e);
                    }
                    self.metrics.increment_sent();
                }
                OutboundEvent::Close => {
                    debug!("Producer received close");
                    return Ok(());
                }
            }
        }
    }

    async fn write(
        &self,
        writer: &mut SocketWriter,
        message: Message,
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                Err(HubError::ConnectionClosed("session ended during write".into()))
            }
            result = writer.send(message) => result.map_err(HubError::from),
        }
    }
}

fn build_request(
    params: &SessionParameters,
) -> Result<tungstenite::handshake::client::Request> {
    let mut request = params.socket_url.as_str().into_client_request()?;
    for (key, value) in &params.headers {
        match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().insert(name, value);
            }
            (Err(_), _) => warn!("Invalid header name: {}", key),
            (_, Err(_)) => warn!("Invalid header value for key '{}'", key),
        }
    }
    Ok(request)
}
