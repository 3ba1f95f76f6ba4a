//! Session negotiation
//!
//! Runs before every socket attempt and yields the socket URL plus the
//! headers to open it with.
//!
//! - Legacy: `GET {url}/negotiate` is mandatory. Its `ConnectionToken` goes
//!   into the `connect` URL and its cookies into a `Cookie` header.
//! - Core: everything is best-effort. An `OPTIONS` pre-flight picks up the
//!   load-balancer affinity cookie and a `POST ?negotiateVersion=1` may
//!   provide a connection token. Failures (including 503) are logged and
//!   the socket is opened with whatever was gathered.

use crate::error::{HubError, Result};
use crate::traits::{Headers, LegacyProtocol, ProtocolKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Load-balancer affinity cookie copied from the core pre-flight
pub const AFFINITY_COOKIE: &str = "AWSALBCORS";

/// Everything needed to open one socket
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParameters {
    pub socket_url: String,
    pub headers: Headers,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyNegotiateResponse {
    connection_token: String,
    #[serde(default)]
    protocol_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreNegotiateResponse {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    available_transports: Vec<serde_json::Value>,
}

/// Performs the pre-socket HTTP exchange for one protocol variant
#[derive(Debug, Clone)]
pub struct Negotiator {
    http: reqwest::Client,
    kind: ProtocolKind,
    url: Url,
    negotiate_url: Option<String>,
    hub_names: Vec<String>,
}

impl Negotiator {
    pub fn new(
        kind: ProtocolKind,
        url: &str,
        negotiate_url: Option<String>,
        hub_names: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| HubError::Configuration(format!("invalid url '{}': {}", url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HubError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            kind,
            url,
            negotiate_url,
            hub_names,
        })
    }

    pub async fn negotiate(&self, headers: Headers) -> Result<SessionParameters> {
        match self.kind {
            ProtocolKind::Legacy => self.negotiate_legacy(headers).await,
            ProtocolKind::Core => Ok(self.negotiate_core(headers).await),
        }
    }

    fn connection_data(&self) -> String {
        let hubs: Vec<serde_json::Value> = self
            .hub_names
            .iter()
            .map(|name| serde_json::json!({ "name": name }))
            .collect();
        serde_json::Value::Array(hubs).to_string()
    }

    async fn negotiate_legacy(&self, mut headers: Headers) -> Result<SessionParameters> {
        let connection_data = self.connection_data();
        let mut negotiate = with_scheme(&self.url, false)?;
        push_path(&mut negotiate, "negotiate");
        negotiate
            .query_pairs_mut()
            .append_pair("connectionData", &connection_data)
            .append_pair("clientProtocol", LegacyProtocol::CLIENT_PROTOCOL);

        debug!(url = %negotiate, "Negotiating legacy session");
        let response = self
            .http
            .get(negotiate)
            .headers(to_header_map(&headers))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HubError::Negotiation(format!(
                "negotiate returned {}",
                response.status()
            )));
        }

        let cookies = cookie_header(&response);
        let body: LegacyNegotiateResponse = response.json().await?;
        if !cookies.is_empty() {
            headers.insert("Cookie".to_string(), cookies);
        }

        let mut socket = with_scheme(&self.url, true)?;
        push_path(&mut socket, "connect");
        socket
            .query_pairs_mut()
            .append_pair("transport", "webSockets")
            .append_pair("connectionToken", &body.connection_token)
            .append_pair("connectionData", &connection_data)
            .append_pair(
                "clientProtocol",
                body.protocol_version
                    .as_deref()
                    .unwrap_or(LegacyProtocol::CLIENT_PROTOCOL),
            );

        Ok(SessionParameters {
            socket_url: socket.to_string(),
            headers,
        })
    }

    fn core_negotiate_url(&self) -> Result<Url> {
        match &self.negotiate_url {
            Some(url) => Url::parse(url)
                .map_err(|e| HubError::Configuration(format!("invalid negotiate url '{}': {}", url, e))),
            None => {
                let mut url = with_scheme(&self.url, false)?;
                push_path(&mut url, "negotiate");
                Ok(url)
            }
        }
    }

    async fn negotiate_core(&self, mut headers: Headers) -> SessionParameters {
        let mut socket_url = match with_scheme(&self.url, true) {
            Ok(url) => url,
            Err(_) => self.url.clone(),
        };

        let negotiate_url = match self.core_negotiate_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping negotiation: {}", e);
                return SessionParameters {
                    socket_url: socket_url.to_string(),
                    headers,
                };
            }
        };

        // Pre-flight for the affinity cookie
        match self
            .http
            .request(Method::OPTIONS, negotiate_url.clone())
            .headers(to_header_map(&headers))
            .send()
            .await
        {
            Ok(response) => {
                let affinity = response
                    .cookies()
                    .find(|cookie| cookie.name() == AFFINITY_COOKIE)
                    .map(|cookie| cookie.value().to_string())
                    .unwrap_or_default();
                headers.insert("Cookie".to_string(), format!("{}={}", AFFINITY_COOKIE, affinity));
            }
            Err(e) => debug!("Negotiate pre-flight failed, continuing: {}", e),
        }

        let mut post_url = negotiate_url;
        post_url.query_pairs_mut().append_pair("negotiateVersion", "1");

        match self
            .http
            .post(post_url)
            .headers(to_header_map(&headers))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                match response.json::<CoreNegotiateResponse>().await {
                    Ok(body) => {
                        debug!(
                            transports = body.available_transports.len(),
                            "Negotiated core session"
                        );
                        if let Some(id) = body.connection_token.or(body.connection_id) {
                            socket_url.query_pairs_mut().append_pair("id", &id);
                        }
                    }
                    Err(e) => warn!("Unreadable negotiate response, continuing: {}", e),
                }
            }
            Ok(response) if response.status() == StatusCode::SERVICE_UNAVAILABLE => {
                info!("Negotiate endpoint unavailable (503), connecting directly");
            }
            Ok(response) => {
                warn!("Negotiate returned {}, connecting directly", response.status());
            }
            Err(e) => warn!("Negotiate failed, connecting directly: {}", e),
        }

        SessionParameters {
            socket_url: socket_url.to_string(),
            headers,
        }
    }
}

/// Switch between the HTTP and WebSocket flavour of a URL
fn with_scheme(url: &Url, websocket: bool) -> Result<Url> {
    let target = match (url.scheme(), websocket) {
        ("https" | "wss", true) => "wss",
        ("http" | "ws", true) => "ws",
        ("https" | "wss", false) => "https",
        ("http" | "ws", false) => "http",
        (other, _) => {
            return Err(HubError::Configuration(format!("unsupported url scheme '{}'", other)))
        }
    };

    let mut switched = url.clone();
    switched
        .set_scheme(target)
        .map_err(|_| HubError::Configuration(format!("cannot switch scheme of {}", url)))?;
    Ok(switched)
}

fn push_path(url: &mut Url, segment: &str) {
    let path = format!("{}/{}", url.path().trim_end_matches('/'), segment);
    url.set_path(&path);
}

fn cookie_header(response: &reqwest::Response) -> String {
    response
        .cookies()
        .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convert headers for a plain HTTP request
///
/// `Connection` and `Accept-Encoding` are left to the HTTP client, which
/// only decodes what it advertised itself; invalid names or values are
/// skipped and logged.
pub(crate) fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        if key.eq_ignore_ascii_case("connection") || key.eq_ignore_ascii_case("accept-encoding") {
            continue;
        }
        match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            (Err(_), _) => warn!("Invalid header name: {}", key),
            (_, Err(_)) => warn!("Invalid header value for key '{}'", key),
        }
    }
    map
}
