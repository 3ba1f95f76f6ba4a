//! Hub engine: frames, hooks, connection, transport and supervisor
//!
//! ## Example
//!
//! ```rust,ignore
//! use hubsockets::{ProtocolKind, StaticHeaders};
//!
//! #[tokio::main]
//! async fn main() -> hubsockets::Result<()> {
//!     let connection = hubsockets::builder()
//!         .url("https://livetiming.formula1.com/signalr")
//!         .protocol(ProtocolKind::Legacy)
//!         .headers(StaticHeaders::default().with("User-Agent", "BestHTTP"))
//!         .build()?;
//!
//!     let hub = connection.register_hub("Streaming")?;
//!     hub.client.on("feed", |arguments| async move {
//!         println!("{:?}", arguments);
//!         Ok(())
//!     });
//!
//!     connection.start().await
//! }
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod connection_state;
pub mod event_hook;
pub mod frame;
pub mod hub;
pub mod keepalive;
pub mod negotiate;
pub mod queue;
pub mod supervisor;
pub mod transport;

// Re-export main types
pub use builder::{states, ConnectionBuilder};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
pub use event_hook::{EventHook, SubscriptionId};
pub use frame::{Frame, Invocation, LegacyEnvelope, LegacyMessage};
pub use hub::{HandlerFn, Hub, HubClient, HubServer, PendingInvocations};
pub use keepalive::{KeepaliveConfig, PongTracker};
pub use negotiate::{Negotiator, SessionParameters, AFFINITY_COOKIE};
pub use queue::{OutboundEvent, OutboundQueue};
pub use supervisor::{
    LivenessTracker, SessionControl, Supervisor, SupervisorConfig, SupervisorExit, Verdict,
};
pub use transport::Transport;

/// Create a new connection builder
///
/// # Example
/// ```ignore
/// let connection = hubsockets::builder()
///     .url("wss://livetiming.formula1.com/signalrcore")
///     .protocol(ProtocolKind::Core)
///     .build()?;
/// ```
pub fn builder() -> ConnectionBuilder<builder::states::NoUrl> {
    ConnectionBuilder::new()
}
