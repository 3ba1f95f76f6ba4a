//! CLI utilities for binaries
//!
//! Handles argument parsing and configuration loading. Settings are
//! layered: defaults, then the YAML file, then command line flags.

use clap::{Args, Parser, Subcommand};
use livetiming::{ConfigError, ProtocolKind, RecorderConfig};
use std::path::PathBuf;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "LIVETIMING_CONFIG";

/// Configuration file used when the environment variable is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/livetiming.yaml";

#[derive(Parser, Debug)]
#[command(name = "livetiming")]
#[command(version)]
#[command(about = "Save live timing data during a session")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save live timing data
    Save(SaveArgs),
    /// Extract messages from saved debug-mode data
    Extract {
        /// Input file name
        input: PathBuf,
        /// Output file name
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Output file name
    pub file: PathBuf,

    /// Topics to subscribe to
    #[arg(required = true, num_args = 1..)]
    pub topics: Vec<String>,

    /// Append to the output file instead of overwriting it
    #[arg(long)]
    pub append: bool,

    /// Save every raw frame, not just the feed data
    #[arg(long)]
    pub debug: bool,

    /// Exit if no data arrives within this many seconds of connecting (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use the authenticated core protocol (token from F1_TOKEN)
    #[arg(long)]
    pub auth: bool,

    /// Configuration file; overrides LIVETIMING_CONFIG
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl SaveArgs {
    /// Overlay the command line onto `config`
    pub fn apply(&self, mut config: RecorderConfig) -> RecorderConfig {
        config.output = self.file.clone();
        config.topics = self.topics.clone();
        config.append |= self.append;
        config.debug |= self.debug;
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if self.auth {
            config.protocol = ProtocolKind::Core;
        }
        config
    }

    /// Load, overlay and validate the recorder configuration
    ///
    /// An explicit `--config` must exist; the environment/default path may
    /// be absent.
    pub fn load_config(&self) -> Result<RecorderConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => RecorderConfig::load(path)?,
            None => RecorderConfig::load_or_default(config_path_from_env())?,
        };
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }
}

/// Load configuration path from environment or use default
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}
