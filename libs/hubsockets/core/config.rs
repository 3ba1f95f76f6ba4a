use crate::core::keepalive::KeepaliveConfig;
use crate::traits::*;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a hub [`Connection`](crate::Connection)
///
/// Built by the type-state builder; immutable once the connection exists.
pub struct ConnectionConfig {
    /// Hub endpoint (`https://`, `http://`, `wss://` or `ws://`)
    pub(crate) url: String,

    /// Wire protocol variant
    pub(crate) protocol: ProtocolKind,

    /// Override for the core negotiate endpoint
    pub(crate) negotiate_url: Option<String>,

    /// Headers for negotiation and the socket upgrade, fetched per session
    pub(crate) headers: Arc<dyn HeaderProvider>,

    /// Delay between sessions
    pub(crate) reconnect_strategy: Box<dyn ReconnectionStrategy>,

    /// Ping interval and pong timeout
    pub(crate) keepalive: KeepaliveConfig,

    /// Timeout for every negotiation request
    pub(crate) http_timeout: Duration,

    /// Time allowed for the core handshake response
    pub(crate) handshake_timeout: Duration,
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn negotiate_url(&self) -> Option<&str> {
        self.negotiate_url.as_deref()
    }

    pub fn keepalive(&self) -> KeepaliveConfig {
        self.keepalive
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("protocol", &self.protocol)
            .field("negotiate_url", &self.negotiate_url)
            .field("keepalive", &self.keepalive)
            .field("http_timeout", &self.http_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}
