//! Wire frames for both hub protocol variants
//!
//! Inbound traffic decodes into the closed [`Frame`] union. Which variant a
//! record becomes is decided by the active protocol and, for the core
//! protocol, by the integer `type` discriminant. Nothing is parsed
//! speculatively.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One hub message inside a legacy batch: `{H, M, A}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacyMessage {
    #[serde(rename = "H", default)]
    pub hub: String,
    #[serde(rename = "M", default)]
    pub method: String,
    #[serde(rename = "A", default)]
    pub arguments: Vec<Value>,
}

/// Outer legacy envelope
///
/// `{}` is a server keepalive and decodes to an envelope with every field
/// empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacyEnvelope {
    /// Message cursor
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Batched hub messages
    #[serde(rename = "M", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<LegacyMessage>,
    /// Server error
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result of a client invocation
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Id of the invocation `R`/`E` answers
    #[serde(
        rename = "I",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub invocation_id: Option<String>,
    /// Set to 1 on the init message of a fresh connection
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub initialized: Option<u8>,
}

impl LegacyEnvelope {
    /// True for the empty `{}` keepalive
    pub fn is_keepalive(&self) -> bool {
        self == &LegacyEnvelope::default()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "invocation id must be a string or number, got {}",
            other
        ))),
    }
}

/// Inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Legacy batched envelope
    Legacy(LegacyEnvelope),
    /// Core handshake response (`{}` or `{"error": ...}`)
    Handshake { error: Option<String> },
    /// Core server-to-client invocation
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Core completion of a client invocation
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Core keepalive
    Ping,
    /// Core close request from the server
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

impl Frame {
    /// Server-reported error carried by this frame, if any
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Frame::Legacy(envelope) => envelope.error.as_deref(),
            Frame::Handshake { error } => error.as_deref(),
            Frame::Completion { error, .. } => error.as_deref(),
            Frame::Close { error, .. } => error.as_deref(),
            Frame::Invocation { .. } | Frame::Ping => None,
        }
    }

    /// Whether the frame carries application data, as opposed to
    /// keepalives, handshakes and close requests
    pub fn carries_data(&self) -> bool {
        match self {
            Frame::Legacy(envelope) => !envelope.messages.is_empty() || envelope.result.is_some(),
            Frame::Invocation { .. } | Frame::Completion { .. } => true,
            Frame::Handshake { .. } | Frame::Ping | Frame::Close { .. } => false,
        }
    }

    /// Whether the server asked to end the session
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close { .. })
    }

    /// JSON form of the frame, as it would appear on the wire
    pub fn to_json(&self) -> Value {
        match self {
            Frame::Legacy(envelope) => {
                serde_json::to_value(envelope).unwrap_or_else(|_| Value::Object(Default::default()))
            }
            Frame::Handshake { error: None } => json!({}),
            Frame::Handshake { error: Some(error) } => json!({ "error": error }),
            Frame::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut value = json!({ "type": 1, "target": target, "arguments": arguments });
                if let Some(id) = invocation_id {
                    value["invocationId"] = json!(id);
                }
                value
            }
            Frame::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut value = json!({ "type": 3, "invocationId": invocation_id });
                if let Some(result) = result {
                    value["result"] = result.clone();
                }
                if let Some(error) = error {
                    value["error"] = json!(error);
                }
                value
            }
            Frame::Ping => json!({ "type": 6 }),
            Frame::Close {
                error,
                allow_reconnect,
            } => {
                let mut value = json!({ "type": 7, "allowReconnect": allow_reconnect });
                if let Some(error) = error {
                    value["error"] = json!(error);
                }
                value
            }
        }
    }
}

/// Outbound invocation, before protocol encoding
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub hub: String,
    pub method: String,
    pub arguments: Vec<Value>,
    pub id: u64,
}

/// Message type discriminants of the core protocol
pub(crate) mod core_type {
    pub const INVOCATION: u64 = 1;
    pub const STREAM_ITEM: u64 = 2;
    pub const COMPLETION: u64 = 3;
    pub const PING: u64 = 6;
    pub const CLOSE: u64 = 7;
}

/// Flat view of a core record, interpreted according to `type`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawCoreRecord {
    #[serde(rename = "type")]
    pub kind: Option<u64>,
    #[serde(default)]
    pub invocation_id: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<Value>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub allow_reconnect: Option<bool>,
}
