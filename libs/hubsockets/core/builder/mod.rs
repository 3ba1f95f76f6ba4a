pub mod states;

use crate::core::config::ConnectionConfig;
use crate::core::connection::Connection;
use crate::core::keepalive::KeepaliveConfig;
use crate::error::{HubError, Result};
use crate::traits::*;
use states::*;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for each negotiation request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the core handshake response
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Type-state builder for [`Connection`]
///
/// The endpoint URL is required and enforced by the type system; every
/// other setting has a default.
pub struct ConnectionBuilder<U>
where
    U: UrlState,
{
    _state: TypeState<U>,
    url: Option<String>,
    protocol: ProtocolKind,
    negotiate_url: Option<String>,
    headers: Option<Arc<dyn HeaderProvider>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    keepalive: KeepaliveConfig,
    http_timeout: Duration,
    handshake_timeout: Duration,
}

impl ConnectionBuilder<NoUrl> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            url: None,
            protocol: ProtocolKind::default(),
            negotiate_url: None,
            headers: None,
            reconnect_strategy: None,
            keepalive: KeepaliveConfig::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn url(self, url: impl Into<String>) -> ConnectionBuilder<HasUrl> {
        ConnectionBuilder {
            _state: TypeState::new(),
            url: Some(url.into()),
            protocol: self.protocol,
            negotiate_url: self.negotiate_url,
            headers: self.headers,
            reconnect_strategy: self.reconnect_strategy,
            keepalive: self.keepalive,
            http_timeout: self.http_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

impl Default for ConnectionBuilder<NoUrl> {
    fn default() -> Self {
        Self::new()
    }
}

// Optional configuration methods (available in all states)
impl<U> ConnectionBuilder<U>
where
    U: UrlState,
{
    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    /// Override the core negotiate endpoint (defaults to `{url}/negotiate`)
    pub fn negotiate_url(mut self, url: impl Into<String>) -> Self {
        self.negotiate_url = Some(url.into());
        self
    }

    pub fn headers(mut self, provider: impl HeaderProvider + 'static) -> Self {
        self.headers = Some(Arc::new(provider));
        self
    }

    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Set the ping interval and pong timeout
    ///
    /// A session whose ping goes unanswered for longer than the timeout is
    /// torn down and reconnected.
    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl ConnectionBuilder<HasUrl> {
    /// Build the connection
    ///
    /// Nothing touches the network until [`Connection::start`].
    pub fn build(self) -> Result<Arc<Connection>> {
        let url = self
            .url
            .ok_or_else(|| HubError::Configuration("url is required".into()))?;
        reqwest::Url::parse(&url)
            .map_err(|e| HubError::Configuration(format!("invalid url '{}': {}", url, e)))?;
        if self.keepalive.interval.is_zero() {
            return Err(HubError::Configuration("keepalive interval must be non-zero".into()));
        }

        let config = ConnectionConfig {
            url,
            protocol: self.protocol,
            negotiate_url: self.negotiate_url,
            headers: self.headers.unwrap_or_else(|| Arc::new(NoHeaders)),
            reconnect_strategy: self
                .reconnect_strategy
                .unwrap_or_else(|| Box::new(FixedDelay::default())),
            keepalive: self.keepalive,
            http_timeout: self.http_timeout,
            handshake_timeout: self.handshake_timeout,
        };

        Ok(Connection::new(config))
    }
}
