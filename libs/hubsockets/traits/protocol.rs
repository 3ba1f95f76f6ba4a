//! Hub protocol variants
//!
//! A [`HubProtocol`] turns outbound [`Invocation`]s into socket text and
//! socket text into [`Frame`]s. Two variants exist:
//!
//! - [`LegacyProtocol`]: one JSON object per socket message, `{H, M, A, I}`
//!   invocations and `{C, M, E, R, I}` envelopes
//! - [`CoreProtocol`]: `0x1E`-terminated JSON records with an integer `type`
//!   discriminant, preceded by a `{protocol, version}` handshake

use crate::core::frame::{core_type, Frame, Invocation, LegacyEnvelope, RawCoreRecord};
use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;

/// Core protocol record separator
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Encoding and decoding rules of one protocol variant
pub trait HubProtocol: Send + Sync + Debug {
    /// Which variant this is
    fn kind(&self) -> ProtocolKind;

    /// Encode an outbound invocation as socket text
    fn encode_invocation(&self, invocation: &Invocation) -> Result<String>;

    /// Decode one socket text message
    ///
    /// A message may carry several records; each decodes independently so a
    /// single malformed record does not poison its neighbours.
    fn decode(&self, text: &str) -> Vec<Result<Frame>>;

    /// Handshake to send right after the socket opens, if any
    fn handshake_request(&self) -> Option<String> {
        None
    }

    /// Decode the first inbound message of a session
    ///
    /// Returns the handshake frame together with any records that followed
    /// it in the same socket message.
    fn decode_handshake(&self, text: &str) -> Result<(Frame, Vec<Result<Frame>>)> {
        Err(HubError::Protocol(format!(
            "{:?} protocol has no handshake, got {:?}",
            self.kind(),
            text
        )))
    }

    /// Application-level keepalive sent alongside socket pings, if any
    fn keepalive(&self) -> Option<String> {
        None
    }
}

/// Protocol variant selector, usable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Legacy,
    Core,
}

impl ProtocolKind {
    /// Instantiate the protocol implementation
    pub fn protocol(self) -> Arc<dyn HubProtocol> {
        match self {
            ProtocolKind::Legacy => Arc::new(LegacyProtocol),
            ProtocolKind::Core => Arc::new(CoreProtocol),
        }
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "signalr" => Ok(ProtocolKind::Legacy),
            "core" | "signalrcore" => Ok(ProtocolKind::Core),
            other => Err(HubError::Configuration(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Legacy hub protocol (client protocol 1.5)
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyProtocol;

impl LegacyProtocol {
    pub const CLIENT_PROTOCOL: &'static str = "1.5";
}

impl HubProtocol for LegacyProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Legacy
    }

    fn encode_invocation(&self, invocation: &Invocation) -> Result<String> {
        let message = json!({
            "H": invocation.hub,
            "M": invocation.method,
            "A": invocation.arguments,
            "I": invocation.id,
        });
        Ok(serde_json::to_string(&message)?)
    }

    fn decode(&self, text: &str) -> Vec<Result<Frame>> {
        let decoded = serde_json::from_str::<Value>(text)
            .map_err(HubError::from)
            .and_then(|value| {
                if !value.is_object() {
                    return Err(HubError::Protocol(format!(
                        "expected a JSON object, got {}",
                        value
                    )));
                }
                Ok(Frame::Legacy(serde_json::from_value::<LegacyEnvelope>(value)?))
            });
        vec![decoded]
    }
}

/// JSON hub protocol, version 1
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreProtocol;

impl CoreProtocol {
    fn records(text: &str) -> impl Iterator<Item = &str> {
        text.split(RECORD_SEPARATOR)
            .filter(|record| !record.trim().is_empty())
    }

    fn decode_record(record: &str) -> Result<Frame> {
        let raw: RawCoreRecord = serde_json::from_str(record)?;
        let kind = raw
            .kind
            .ok_or_else(|| HubError::Protocol(format!("record without type: {}", record)))?;

        match kind {
            core_type::INVOCATION => Ok(Frame::Invocation {
                invocation_id: raw.invocation_id,
                target: raw
                    .target
                    .ok_or_else(|| HubError::Protocol("invocation without target".into()))?,
                arguments: raw.arguments.unwrap_or_default(),
            }),
            core_type::COMPLETION => Ok(Frame::Completion {
                invocation_id: raw
                    .invocation_id
                    .ok_or_else(|| HubError::Protocol("completion without invocationId".into()))?,
                result: raw.result,
                error: raw.error,
            }),
            core_type::PING => Ok(Frame::Ping),
            core_type::CLOSE => Ok(Frame::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            }),
            core_type::STREAM_ITEM => Err(HubError::Protocol("stream items are not supported".into())),
            other => Err(HubError::Protocol(format!("unsupported message type {}", other))),
        }
    }
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(rename = "type")]
    kind: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl HubProtocol for CoreProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Core
    }

    fn encode_invocation(&self, invocation: &Invocation) -> Result<String> {
        let message = json!({
            "type": core_type::INVOCATION,
            "invocationId": invocation.id.to_string(),
            "target": invocation.method,
            "arguments": invocation.arguments,
        });
        Ok(format!("{}{}", serde_json::to_string(&message)?, RECORD_SEPARATOR))
    }

    fn decode(&self, text: &str) -> Vec<Result<Frame>> {
        Self::records(text).map(Self::decode_record).collect()
    }

    fn handshake_request(&self) -> Option<String> {
        Some(format!(r#"{{"protocol":"json","version":1}}{}"#, RECORD_SEPARATOR))
    }

    fn decode_handshake(&self, text: &str) -> Result<(Frame, Vec<Result<Frame>>)> {
        let mut records = Self::records(text);
        let first = records
            .next()
            .ok_or_else(|| HubError::Protocol("empty handshake response".into()))?;

        let response: HandshakeResponse = serde_json::from_str(first)?;
        if let Some(kind) = response.kind {
            return Err(HubError::Protocol(format!(
                "expected handshake response, got message type {}",
                kind
            )));
        }

        let rest = records.map(Self::decode_record).collect();
        Ok((Frame::Handshake { error: response.error }, rest))
    }

    fn keepalive(&self) -> Option<String> {
        Some(format!(r#"{{"type":{}}}{}"#, core_type::PING, RECORD_SEPARATOR))
    }
}
