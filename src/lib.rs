//! Live timing recorder - Main Library
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for the binary (CLI, config path resolution)
//! - **livetiming**: Recorder client, sink and extraction (re-exported from workspace)
//! - **hubsockets**: Hub connection engine (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use livetiming_recorder::bin_common::{Cli, Command};
//! use livetiming_recorder::livetiming::LiveTimingClient;
//! ```

// Re-export workspace libraries for convenience
pub use hubsockets;
pub use livetiming;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;

    pub use cli::{config_path_from_env, Cli, Command, SaveArgs, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
}
