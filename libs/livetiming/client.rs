//! Live timing recorder
//!
//! [`LiveTimingClient`] records one hub connection into one output file.
//! It owns the exit signal: a startup timeout, Ctrl+C and [`stop`] all
//! cancel the same token and run the same teardown, which closes the
//! connection, waits for the transport, then closes the sink once.
//!
//! [`stop`]: LiveTimingClient::stop

use crate::config::RecorderConfig;
use crate::error::{ClientError, Result};
use crate::sink::{FileSink, SinkWriter};
use crate::utils::ShutdownManager;
use hubsockets::{
    Connection, FixedDelay, Frame, Hub, HubError, KeepaliveConfig, Metrics, ProtocolKind,
    SessionControl, StaticHeaders, Supervisor, SupervisorConfig, SupervisorExit, TokenProvider,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

pub const HUB_NAME: &str = "Streaming";
pub const FEED_METHOD: &str = "feed";
pub const SUBSCRIBE_METHOD: &str = "Subscribe";

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stopped on request (Ctrl+C, [`LiveTimingClient::stop`])
    Stopped,
    /// Nothing arrived within the startup timeout of a session
    StartupTimeout,
}

#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub reason: ExitReason,
    pub lines_written: u64,
    pub metrics: Metrics,
}

impl ClientOutcome {
    pub fn is_startup_timeout(&self) -> bool {
        self.reason == ExitReason::StartupTimeout
    }
}

/// Routes feed data into the sink, honouring the grace window
#[derive(Clone)]
struct DataWriter {
    sink: Arc<SinkWriter>,
    connection: Weak<Connection>,
    grace: Duration,
}

impl DataWriter {
    fn in_grace_window(&self) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|connection| connection.liveness().in_grace_window(self.grace))
    }

    fn write(&self, line: String) -> hubsockets::Result<()> {
        self.sink
            .write(line)
            .map_err(|e| HubError::Handler(e.to_string()))
    }

    fn write_feed(&self, arguments: &[Value]) -> hubsockets::Result<()> {
        if self.in_grace_window() {
            trace!("Dropping feed message inside grace window");
            return Ok(());
        }
        self.write(serde_json::to_string(arguments)?)
    }

    /// One `[topic, json, ""]` line per topic of a subscribe result
    fn write_snapshot(&self, arguments: &[Value]) -> hubsockets::Result<()> {
        if self.in_grace_window() {
            trace!("Dropping subscribe result inside grace window");
            return Ok(());
        }
        match arguments.first() {
            Some(Value::Object(topics)) => {
                for (topic, state) in topics {
                    self.write(json!([topic, state.to_string(), ""]).to_string())?;
                }
            }
            _ => debug!("Subscribe completed without a snapshot"),
        }
        Ok(())
    }

    fn write_frame(&self, frame: &Frame) -> hubsockets::Result<()> {
        match frame {
            Frame::Ping => Ok(()),
            Frame::Legacy(envelope) if envelope.is_keepalive() => Ok(()),
            frame => self.write(frame.to_json().to_string()),
        }
    }
}

pub struct LiveTimingClient {
    config: RecorderConfig,
    token: Option<Arc<dyn TokenProvider>>,
    shutdown: ShutdownManager,
    started: AtomicBool,
}

impl LiveTimingClient {
    /// `token` is required for the core protocol and ignored otherwise
    pub fn new(config: RecorderConfig, token: Option<Arc<dyn TokenProvider>>) -> Self {
        Self {
            config,
            token,
            shutdown: ShutdownManager::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Request shutdown; safe to call any number of times, before or during `start`
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Handle that stops this client from elsewhere
    pub fn stop_handle(&self) -> ShutdownManager {
        self.shutdown.clone()
    }

    /// Record until stopped or until the startup timeout fires
    ///
    /// Authentication and configuration problems are returned before the
    /// output file is touched. A client runs once.
    pub async fn start(&self) -> Result<ClientOutcome> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyStarted);
        }
        self.config.validate()?;

        let span = info_span!(
            "livetiming",
            protocol = ?self.config.protocol,
            output = %self.config.output.display()
        );
        self.run().instrument(span).await
    }

    async fn run(&self) -> Result<ClientOutcome> {
        let headers = self.session_headers().await?;
        let sink = Arc::new(SinkWriter::spawn(FileSink::open(
            &self.config.output,
            self.config.append,
        )?)?);

        let connection = self.connect(headers)?;
        let hub = connection.register_hub(HUB_NAME)?;
        let writer = DataWriter {
            sink: Arc::clone(&sink),
            connection: Arc::downgrade(&connection),
            grace: self.config.grace_window(),
        };
        self.wire_output(&connection, &hub, writer);
        self.wire_subscribe(&connection, &hub);

        let supervisor = Supervisor::new(
            SupervisorConfig {
                startup_timeout: self.config.startup_timeout(),
                stall_threshold: self.config.stall_threshold(),
                poll_interval: self.config.poll_interval(),
            },
            Arc::clone(&connection) as Arc<dyn SessionControl>,
            self.shutdown.token(),
        )?;

        info!(topics = ?self.config.topics, url = %connection.url(), "Recording live timing");
        let mut runner = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.start().await }.in_current_span())
        };

        let (reason, finished) = tokio::select! {
            exit = supervisor.run() => {
                let reason = match exit {
                    SupervisorExit::StartupTimeout => ExitReason::StartupTimeout,
                    SupervisorExit::Cancelled => ExitReason::Stopped,
                };
                (reason, None)
            }
            joined = &mut runner => (ExitReason::Stopped, Some(joined)),
        };

        info!(?reason, "Shutting down");
        self.shutdown.trigger();
        connection.close();

        let joined = match finished {
            Some(joined) => Some(joined),
            None => match tokio::time::timeout(TEARDOWN_TIMEOUT, &mut runner).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!("Transport did not stop within {:?}, aborting", TEARDOWN_TIMEOUT);
                    runner.abort();
                    None
                }
            },
        };

        let closer = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || closer.close()).await??;

        if let Some(joined) = joined {
            joined??;
        }

        let outcome = ClientOutcome {
            reason,
            lines_written: sink.lines_written(),
            metrics: connection.metrics(),
        };
        info!(
            lines = outcome.lines_written,
            sessions = outcome.metrics.sessions_started,
            malformed = outcome.metrics.malformed_frames,
            "Recording finished"
        );
        Ok(outcome)
    }

    async fn session_headers(&self) -> Result<StaticHeaders> {
        let mut headers = StaticHeaders::default()
            .with("User-Agent", "BestHTTP")
            .with("Accept-Encoding", "gzip, identity")
            .with("Connection", "keep-alive, Upgrade");

        if self.config.protocol == ProtocolKind::Core {
            let provider = self.token.as_ref().ok_or_else(|| {
                ClientError::Authentication("the core protocol requires a token provider".into())
            })?;
            let token = provider.token().await.map_err(|e| match e {
                HubError::AuthenticationFailed(message) => ClientError::Authentication(message),
                other => ClientError::Authentication(other.to_string()),
            })?;
            info!("Using bearer token for authentication");
            headers = headers.with("Authorization", format!("Bearer {}", token));
        }

        Ok(headers)
    }

    fn connect(&self, headers: StaticHeaders) -> Result<Arc<Connection>> {
        let config = &self.config;
        let mut builder = hubsockets::builder()
            .url(config.endpoint())
            .protocol(config.protocol)
            .headers(headers)
            .reconnect_strategy(FixedDelay::new(config.reconnect_delay()))
            .keepalive(KeepaliveConfig {
                interval: Duration::from_secs(config.ping_interval),
                pong_timeout: Duration::from_secs(config.pong_timeout),
            });

        if config.protocol == ProtocolKind::Core {
            if let Some(url) = config.core_negotiate_url() {
                builder = builder.negotiate_url(url);
            }
        }

        Ok(builder.build()?)
    }

    fn wire_output(&self, connection: &Arc<Connection>, hub: &Arc<Hub>, writer: DataWriter) {
        if self.config.debug {
            // Raw frames only; the feed handler stays registered so feed
            // messages are not reported as unhandled
            hub.client.on(FEED_METHOD, |_| async { Ok(()) });
            connection.received.subscribe(move |frame: Arc<Frame>| {
                let writer = writer.clone();
                async move { writer.write_frame(&frame) }
            });
            return;
        }

        let feed = writer.clone();
        hub.client.on(FEED_METHOD, move |arguments| {
            let feed = feed.clone();
            async move { feed.write_feed(&arguments) }
        });

        // Only core completions carry an initial state worth recording
        if self.config.protocol == ProtocolKind::Core {
            hub.client.on(SUBSCRIBE_METHOD, move |arguments| {
                let writer = writer.clone();
                async move { writer.write_snapshot(&arguments) }
            });
        }
    }

    fn wire_subscribe(&self, connection: &Arc<Connection>, hub: &Arc<Hub>) {
        let hub = Arc::clone(hub);
        let weak = Arc::downgrade(connection);
        let shutdown = self.shutdown.clone();
        let topics = json!(self.config.topics);
        let attempts = self.config.subscribe_attempts;
        let retry = self.config.subscribe_retry();

        connection.connected.subscribe(move |_| {
            let hub = Arc::clone(&hub);
            let weak = weak.clone();
            let shutdown = shutdown.clone();
            let topics = topics.clone();
            async move {
                for attempt in 1..=attempts {
                    match hub.server.invoke(SUBSCRIBE_METHOD, vec![topics.clone()]) {
                        Ok(id) => {
                            info!(id, topics = %topics, "Subscribed");
                            return Ok(());
                        }
                        Err(e) if attempt < attempts => {
                            warn!(attempt, "Subscribe attempt failed, retrying: {}", e);
                            if !shutdown.interruptible_sleep(retry).await {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            error!(attempts, "Failed to subscribe, restarting session: {}", e);
                            if let Some(connection) = weak.upgrade() {
                                connection.restart_session();
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(())
            }
        });
    }
}

impl std::fmt::Debug for LiveTimingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTimingClient")
            .field("config", &self.config)
            .field("authenticated", &self.token.is_some())
            .field("running", &self.shutdown.is_running())
            .finish()
    }
}
