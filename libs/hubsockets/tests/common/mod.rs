//! Common test utilities for hubsockets integration tests
//!
//! [`MockHub`] serves both halves of a hub endpoint on one port: plain HTTP
//! requests get negotiation responses, upgrade requests become scripted
//! WebSocket sessions.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use hubsockets::ProtocolKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

pub const RS: char = '\u{1e}';

pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Script for every session the mock accepts
#[derive(Clone)]
pub struct MockHubConfig {
    pub protocol: ProtocolKind,
    /// Frames sent right after the session is established
    pub greeting: Vec<String>,
    /// Close the socket once the greeting is sent
    pub close_after_greeting: bool,
    /// Replies to each inbound text frame
    pub responder: Option<Responder>,
    /// Status of the negotiate request (GET for legacy, POST for core)
    pub negotiate_status: u16,
    /// Core handshake reply, `{}` when unset
    pub handshake_reply: Option<String>,
    /// Read the core handshake request and never answer it
    pub ignore_handshake: bool,
}

impl MockHubConfig {
    pub fn legacy() -> Self {
        Self {
            protocol: ProtocolKind::Legacy,
            greeting: Vec::new(),
            close_after_greeting: false,
            responder: None,
            negotiate_status: 200,
            handshake_reply: None,
            ignore_handshake: false,
        }
    }

    pub fn core() -> Self {
        Self {
            protocol: ProtocolKind::Core,
            ..Self::legacy()
        }
    }

    pub fn greeting(mut self, frame: impl Into<String>) -> Self {
        self.greeting.push(frame.into());
        self
    }

    pub fn close_after_greeting(mut self) -> Self {
        self.close_after_greeting = true;
        self
    }

    pub fn responder(mut self, responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn negotiate_status(mut self, status: u16) -> Self {
        self.negotiate_status = status;
        self
    }

    /// Answer the core handshake with `reply` and end the socket
    pub fn reject_handshake(mut self, reply: impl Into<String>) -> Self {
        self.handshake_reply = Some(reply.into());
        self
    }

    pub fn ignore_handshake(mut self) -> Self {
        self.ignore_handshake = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub uri: String,
    pub headers: HashMap<String, String>,
}

/// What the mock observed
#[derive(Default)]
pub struct MockState {
    pub sessions: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub received: Mutex<Vec<String>>,
    pub http_requests: Mutex<Vec<String>>,
    pub upgrades: Mutex<Vec<UpgradeRequest>>,
}

pub struct MockHub {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockHub {
    pub async fn start(config: MockHubConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let shutdown = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let config = config.clone();
                                let state = Arc::clone(&accept_state);
                                let shutdown = accept_shutdown.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, config, state, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = accept_shutdown.cancelled() => break,
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// Legacy endpoint URL
    pub fn signalr_url(&self) -> String {
        format!("http://{}/signalr", self.addr)
    }

    /// Core endpoint URL
    pub fn core_url(&self) -> String {
        format!("ws://{}/signalrcore", self.addr)
    }

    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    pub fn http_requests(&self) -> Vec<String> {
        self.state.http_requests.lock().clone()
    }

    pub fn upgrades(&self) -> Vec<UpgradeRequest> {
        self.state.upgrades.lock().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn read_head(stream: &TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 8192];
    for _ in 0..500 {
        let n = stream.peek(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            return Some(text[..end + 4].to_string());
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    None
}

async fn handle_connection(
    mut stream: TcpStream,
    config: MockHubConfig,
    state: Arc<MockState>,
    shutdown: CancellationToken,
) {
    let Some(head) = read_head(&stream).await else {
        return;
    };

    if head.to_ascii_lowercase().contains("upgrade: websocket") {
        handle_socket(stream, config, state, shutdown).await;
        return;
    }

    let mut consumed = vec![0u8; head.len()];
    if stream.read_exact(&mut consumed).await.is_err() {
        return;
    }
    let request_line = head.lines().next().unwrap_or_default();
    let target = request_line
        .rsplit_once(' ')
        .map(|(target, _)| target.to_string())
        .unwrap_or_default();
    state.http_requests.lock().push(target.clone());

    let response = if target.starts_with("OPTIONS") {
        http_response(200, "AWSALBCORS=affinity-1; Path=/", "")
    } else if config.negotiate_status != 200 {
        http_response(config.negotiate_status, "", "")
    } else if target.starts_with("GET") {
        http_response(
            200,
            "session=abc; Path=/",
            r#"{"Url":"/signalr","ConnectionToken":"token-1","ConnectionId":"c-1","ProtocolVersion":"1.5"}"#,
        )
    } else {
        http_response(
            200,
            "",
            r#"{"negotiateVersion":1,"connectionId":"c-1","connectionToken":"core-token","availableTransports":[]}"#,
        )
    };
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn http_response(status: u16, cookie: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        reason,
        body.len()
    );
    if !cookie.is_empty() {
        response.push_str(&format!("Set-Cookie: {}\r\n", cookie));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response
}

struct LiveGuard(Arc<MockState>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_socket(
    stream: TcpStream,
    config: MockHubConfig,
    state: Arc<MockState>,
    shutdown: CancellationToken,
) {
    let upgrade_state = Arc::clone(&state);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        upgrade_state.upgrades.lock().push(UpgradeRequest {
            uri: request.uri().to_string(),
            headers,
        });
        Ok(response)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if config.protocol == ProtocolKind::Core {
        match read.next().await {
            Some(Ok(Message::Text(text))) if text.contains("\"protocol\":\"json\"") => {
                if config.ignore_handshake {
                    shutdown.cancelled().await;
                    return;
                }
                if let Some(reply) = &config.handshake_reply {
                    let _ = write.send(Message::Text(format!("{}{}", reply, RS))).await;
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
                if write.send(Message::Text(format!("{{}}{}", RS))).await.is_err() {
                    return;
                }
            }
            _ => return,
        }
    }

    state.sessions.fetch_add(1, Ordering::SeqCst);
    let live = state.live.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_live.fetch_max(live, Ordering::SeqCst);
    let _guard = LiveGuard(Arc::clone(&state));

    for frame in &config.greeting {
        if write.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    if config.close_after_greeting {
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.received.lock().push(text.clone());
                        if let Some(responder) = &config.responder {
                            for reply in responder(&text) {
                                if write.send(Message::Text(reply)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        }
    }
}
