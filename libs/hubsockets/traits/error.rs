use thiserror::Error;

/// Main error type for hubsockets
#[derive(Error, Debug)]
pub enum HubError {
    /// Negotiation failed before a socket existed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection closed unexpectedly
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Undecodable or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Handler or subscriber failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Outbound queue is closed
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HubError::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        HubError::Negotiation(err.to_string())
    }
}

/// Result type for hubsockets operations
pub type Result<T> = std::result::Result<T, HubError>;
