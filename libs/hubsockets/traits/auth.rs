use crate::error::{HubError, Result};
use async_trait::async_trait;

/// Source of a bearer token for authenticated sessions
///
/// The engine treats the token as opaque. A failure here is an
/// authentication error: it is surfaced to whoever starts the client and
/// never retried by the reconnect loop.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a bearer token
    ///
    /// # Returns
    /// * `Ok(token)` - Token to send as `Authorization: Bearer <token>`
    /// * `Err(HubError::AuthenticationFailed)` - Token could not be obtained
    async fn token(&self) -> Result<String>;
}

/// Reads the token from an environment variable
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new("F1_TOKEN")
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(HubError::AuthenticationFailed(format!(
                "{} environment variable must be set for authenticated sessions",
                self.var
            ))),
        }
    }
}

/// A fixed token, mostly useful in tests
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
