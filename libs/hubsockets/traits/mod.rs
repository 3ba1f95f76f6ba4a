//! # Hubsockets Traits
//!
//! Seams of the hub engine:
//!
//! - **HubProtocol**: encode invocations and decode frames for one wire variant
//! - **HeaderProvider**: HTTP headers for negotiation and socket requests
//! - **TokenProvider**: opaque bearer token acquisition
//! - **ReconnectionStrategy**: delay between reconnection attempts

pub mod auth;
pub mod error;
pub mod headers;
pub mod protocol;
pub mod reconnect;

// Re-export commonly used types
pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use error::{HubError, Result};
pub use headers::{HeaderProvider, Headers, NoHeaders, StaticHeaders};
pub use protocol::{CoreProtocol, HubProtocol, LegacyProtocol, ProtocolKind, RECORD_SEPARATOR};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectionStrategy};
