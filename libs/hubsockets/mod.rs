//! # Hubsockets
//!
//! Resilient client for push-based hub endpoints, speaking both the legacy
//! batched-envelope protocol and the record-separated core protocol.
//!
//! ## Features
//!
//! - **One logical connection**: hubs, handlers and the outbound queue survive reconnects
//! - **Concurrent session halves**: consumer and producer run side by side and are joined on teardown
//! - **Type-state builder**: compile-time guarantee that an endpoint is set
//! - **Watchdog**: separate startup-timeout and stall-restart policies
//! - **Pluggable seams**: protocol, headers, token and reconnection strategy traits

pub mod core;
pub mod traits;

// Re-export all traits
pub use traits::*;
pub use traits::error;

// Re-export core functionality
pub use crate::core::{
    builder, ConnectionBuilder, ConnectionConfig, Connection, ConnectionState, EventHook, Frame,
    Hub, HubClient, HubServer, Invocation, KeepaliveConfig, LegacyEnvelope, LegacyMessage,
    LivenessTracker, Metrics, SessionControl, Supervisor, SupervisorConfig, SupervisorExit,
    SubscriptionId,
};
