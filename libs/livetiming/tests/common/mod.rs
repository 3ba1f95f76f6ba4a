//! Common test utilities for livetiming integration tests
//!
//! [`MockTiming`] plays a scripted live timing endpoint. Every accepted
//! socket is one session; session N follows script N (the last script
//! repeats). A session waits for the client's `Subscribe`, optionally
//! answers it, sends its frames and then either goes silent or keeps
//! streaming.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    Legacy,
    Core,
}

/// What a session does once its frames are sent
#[derive(Debug, Clone, Copy)]
pub enum Then {
    /// Keep the socket open without sending data
    Silent,
    /// Send a numbered feed frame at this interval until the socket closes
    Stream(Duration),
}

#[derive(Debug, Clone)]
pub struct SessionScript {
    /// Sent after the client subscribes
    pub frames: Vec<String>,
    /// Result object answering `Subscribe`
    pub subscribe_result: Option<Value>,
    pub then: Then,
    /// Wait for the client's `Subscribe` before sending anything
    pub await_subscribe: bool,
}

impl SessionScript {
    pub fn frames(frames: Vec<String>) -> Self {
        Self {
            frames,
            subscribe_result: None,
            then: Then::Silent,
            await_subscribe: true,
        }
    }

    pub fn silent() -> Self {
        Self::frames(Vec::new())
    }

    pub fn streaming(interval: Duration) -> Self {
        Self {
            then: Then::Stream(interval),
            ..Self::silent()
        }
    }

    pub fn subscribe_result(mut self, result: Value) -> Self {
        self.subscribe_result = Some(result);
        self
    }

    pub fn no_subscribe_wait(mut self) -> Self {
        self.await_subscribe = false;
        self
    }
}

/// Legacy feed envelope for `topic`
pub fn legacy_feed(topic: &str, payload: Value) -> String {
    json!({
        "C": "d-1",
        "M": [{"H": "Streaming", "M": "feed", "A": [topic, payload, "2024-05-26T13:00:00.000Z"]}]
    })
    .to_string()
}

/// Core feed invocation record for `topic`
pub fn core_feed(topic: &str, payload: Value) -> String {
    format!(
        "{}{}",
        json!({"type": 1, "target": "feed", "arguments": [topic, payload, "2024-05-26T13:00:00.000Z"]}),
        RS
    )
}

/// What the mock observed
#[derive(Default)]
pub struct MockState {
    pub sessions: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub received: Mutex<Vec<String>>,
    pub upgrade_headers: Mutex<Vec<HashMap<String, String>>>,
}

pub struct MockTiming {
    pub addr: SocketAddr,
    pub wire: Wire,
    pub state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockTiming {
    pub async fn start(wire: Wire, scripts: Vec<SessionScript>) -> Self {
        assert!(!scripts.is_empty(), "at least one session script is required");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let shutdown = CancellationToken::new();
        let scripts = Arc::new(scripts);

        let accept_state = Arc::clone(&state);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let scripts = Arc::clone(&scripts);
                                let state = Arc::clone(&accept_state);
                                let shutdown = accept_shutdown.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, wire, scripts, state, shutdown).await;
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
            wire,
            state,
            shutdown,
        }
    }

    /// Endpoint URL for the recorder config
    pub fn url(&self) -> String {
        match self.wire {
            Wire::Legacy => format!("http://{}/signalr", self.addr),
            Wire::Core => format!("ws://{}/signalrcore", self.addr),
        }
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

    pub fn upgrade_headers(&self) -> Vec<HashMap<String, String>> {
        self.state.upgrade_headers.lock().clone()
    }
}

impl Drop for MockTiming {
    fn drop(&mut self) {
        self.shutdown.cancel();
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

/// Lines of `path`, or nothing if it does not exist yet
pub fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
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
    wire: Wire,
    scripts: Arc<Vec<SessionScript>>,
    state: Arc<MockState>,
    shutdown: CancellationToken,
) {
    let Some(head) = read_head(&stream).await else {
        return;
    };

    if head.to_ascii_lowercase().contains("upgrade: websocket") {
        handle_socket(stream, wire, scripts, state, shutdown).await;
        return;
    }

    let mut consumed = vec![0u8; head.len()];
    if stream.read_exact(&mut consumed).await.is_err() {
        return;
    }
    let request_line = head.lines().next().unwrap_or_default();

    let body = if request_line.starts_with("GET") {
        r#"{"Url":"/signalr","ConnectionToken":"token-1","ConnectionId":"c-1","ProtocolVersion":"1.5"}"#
    } else if request_line.starts_with("POST") {
        r#"{"negotiateVersion":1,"connectionId":"c-1","connectionToken":"core-token","availableTransports":[]}"#
    } else {
        ""
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\nSet-Cookie: AWSALBCORS=affinity-1; Path=/\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

struct LiveGuard(Arc<MockState>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn subscribe_reply(wire: Wire, text: &str, result: &Value) -> Option<String> {
    match wire {
        Wire::Legacy => {
            let invocation: Value = serde_json::from_str(text).ok()?;
            Some(json!({"R": result, "I": invocation["I"].to_string()}).to_string())
        }
        Wire::Core => {
            let invocation: Value = serde_json::from_str(text.trim_end_matches(RS)).ok()?;
            Some(format!(
                "{}{}",
                json!({"type": 3, "invocationId": invocation["invocationId"], "result": result}),
                RS
            ))
        }
    }
}

fn stream_frame(wire: Wire, n: u64) -> String {
    let payload = json!({"Stream": n});
    match wire {
        Wire::Legacy => legacy_feed("Heartbeat", payload),
        Wire::Core => core_feed("Heartbeat", payload),
    }
}

async fn handle_socket(
    stream: TcpStream,
    wire: Wire,
    scripts: Arc<Vec<SessionScript>>,
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
        upgrade_state.upgrade_headers.lock().push(headers);
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

    if wire == Wire::Core {
        match read.next().await {
            Some(Ok(Message::Text(text))) if text.contains("\"protocol\":\"json\"") => {
                if write.send(Message::Text(format!("{{}}{}", RS))).await.is_err() {
                    return;
                }
            }
            _ => return,
        }
    }

    let index = state.sessions.fetch_add(1, Ordering::SeqCst);
    let live = state.live.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_live.fetch_max(live, Ordering::SeqCst);
    let _guard = LiveGuard(Arc::clone(&state));
    let script = scripts[index.min(scripts.len() - 1)].clone();

    if script.await_subscribe {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    state.received.lock().push(text.clone());
                    if !text.contains("Subscribe") {
                        continue;
                    }
                    if let Some(result) = &script.subscribe_result {
                        if let Some(reply) = subscribe_reply(wire, &text, result) {
                            if write.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                    break;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            }
        }
    }

    for frame in &script.frames {
        if write.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }

    let mut counter = 0u64;
    let mut ticker = match script.then {
        Then::Stream(interval) => Some(tokio::time::interval(interval)),
        Then::Silent => None,
    };

    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => state.received.lock().push(text),
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
            _ = tick => {
                if write.send(Message::Text(stream_frame(wire, counter))).await.is_err() {
                    return;
                }
                counter += 1;
            }
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        }
    }
}
