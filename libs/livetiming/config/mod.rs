use hubsockets::ProtocolKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const LEGACY_URL: &str = "https://livetiming.formula1.com/signalr";
pub const CORE_URL: &str = "wss://livetiming.formula1.com/signalrcore";
pub const CORE_NEGOTIATE_URL: &str = "https://livetiming.formula1.com/signalrcore/negotiate";

/// Recorder configuration
///
/// Every field has a default, so a partial (or absent) YAML file is valid.
/// Durations are whole seconds unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Output file
    pub output: PathBuf,
    /// Append instead of overwrite
    pub append: bool,
    /// Topics passed to `Subscribe`
    pub topics: Vec<String>,
    /// Wire protocol; `core` requires a bearer token
    pub protocol: ProtocolKind,
    /// Endpoint override (defaults depend on `protocol`)
    pub url: Option<String>,
    /// Core negotiate endpoint override
    pub negotiate_url: Option<String>,
    /// Write every raw frame instead of feed payloads
    pub debug: bool,

    /// No data at all within this long after connecting ends the client (0 disables)
    pub timeout: u64,
    /// Silence after the first message that forces a new session (0 disables)
    pub stall_threshold: u64,
    /// Supervisor poll period
    pub poll_interval_ms: u64,
    /// Post-connect window whose data is not written (default: 5s core, 0 legacy)
    pub grace_window_ms: Option<u64>,

    /// Delay between sessions
    pub reconnect_delay_ms: u64,
    pub ping_interval: u64,
    pub pong_timeout: u64,

    /// Subscribe attempts per session before forcing a restart
    pub subscribe_attempts: u32,
    pub subscribe_retry_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("livetiming.txt"),
            append: false,
            topics: Vec::new(),
            protocol: ProtocolKind::Legacy,
            url: None,
            negotiate_url: None,
            debug: false,
            timeout: 60,
            stall_threshold: 15,
            poll_interval_ms: 1000,
            grace_window_ms: None,
            reconnect_delay_ms: 5000,
            ping_interval: 20,
            pong_timeout: 15,
            subscribe_attempts: 3,
            subscribe_retry_ms: 1000,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a YAML file
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        Self::from_yaml(&yaml_content)
    }

    /// Load from `config_path` if it exists, else start from defaults
    pub fn load_or_default(config_path: impl AsRef<Path>) -> Result<Self> {
        let path = config_path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one topic is required".to_string(),
            ));
        }

        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "topics must not be blank".to_string(),
            ));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.ping_interval == 0 {
            return Err(ConfigError::ValidationError(
                "ping_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.subscribe_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "subscribe_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn endpoint(&self) -> String {
        match (&self.url, self.protocol) {
            (Some(url), _) => url.clone(),
            (None, ProtocolKind::Legacy) => LEGACY_URL.to_string(),
            (None, ProtocolKind::Core) => CORE_URL.to_string(),
        }
    }

    pub fn core_negotiate_url(&self) -> Option<String> {
        match (&self.negotiate_url, &self.url) {
            (Some(url), _) => Some(url.clone()),
            // A custom endpoint negotiates relative to itself
            (None, Some(_)) => None,
            (None, None) => Some(CORE_NEGOTIATE_URL.to_string()),
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_window(&self) -> Duration {
        let default = match self.protocol {
            ProtocolKind::Legacy => 0,
            ProtocolKind::Core => 5000,
        };
        Duration::from_millis(self.grace_window_ms.unwrap_or(default))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn subscribe_retry(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_ms)
    }
}
