use crate::config::ConfigError;
use crate::sink::SinkError;
use hubsockets::HubError;
use thiserror::Error;

/// Errors surfaced by [`LiveTimingClient::start`](crate::LiveTimingClient::start)
#[derive(Error, Debug)]
pub enum ClientError {
    /// No bearer token could be obtained for an authenticated session
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Client was already started")]
    AlreadyStarted,

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(err: tokio::task::JoinError) -> Self {
        ClientError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
