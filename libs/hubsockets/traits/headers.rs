use async_trait::async_trait;
use std::collections::HashMap;

/// HTTP headers sent with negotiation and socket requests
pub type Headers = HashMap<String, String>;

/// Trait for providing HTTP headers dynamically
///
/// Called once per connection attempt (including reconnections), before
/// negotiation. The negotiator layers session cookies on top of whatever
/// this returns, so providers never see cookies from a previous session.
///
/// # Example
/// ```ignore
/// struct BrowserHeaders;
///
/// #[async_trait::async_trait]
/// impl HeaderProvider for BrowserHeaders {
///     async fn get_headers(&self) -> Headers {
///         let mut headers = HashMap::new();
///         headers.insert("User-Agent".to_string(), "BestHTTP".to_string());
///         headers
///     }
/// }
/// ```
#[async_trait]
pub trait HeaderProvider: Send + Sync {
    /// Generate headers for the next connection attempt
    async fn get_headers(&self) -> Headers;
}

/// A no-op header provider that doesn't add any headers
pub struct NoHeaders;

#[async_trait]
impl HeaderProvider for NoHeaders {
    async fn get_headers(&self) -> Headers {
        HashMap::new()
    }
}

/// Header provider returning the same fixed set on every attempt
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: Headers,
}

impl StaticHeaders {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }

    /// Add or replace a header
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl HeaderProvider for StaticHeaders {
    async fn get_headers(&self) -> Headers {
        self.headers.clone()
    }
}
