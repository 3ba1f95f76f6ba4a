//! # Livetiming
//!
//! Records the live timing feed into a line-oriented file.
//!
//! - [`LiveTimingClient`]: one connection, one output file, one exit signal
//! - [`RecorderConfig`]: YAML-backed settings with per-field defaults
//! - [`extract`]: turns debug recordings back into feed messages

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod sink;
pub mod utils;

// Re-export commonly used items
pub use client::{ClientOutcome, ExitReason, LiveTimingClient, FEED_METHOD, HUB_NAME, SUBSCRIBE_METHOD};
pub use config::{ConfigError, RecorderConfig};
pub use error::ClientError;
pub use extract::{extract_file, messages_from_raw, normalize, ExtractSummary};
pub use sink::{FileSink, Sink, SinkError, SinkWriter};
pub use utils::{init_tracing, ShutdownManager};

pub use hubsockets::{EnvToken, ProtocolKind, StaticToken, TokenProvider};
