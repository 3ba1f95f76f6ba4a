//! Named remote-procedure channel on top of a [`Connection`]
//!
//! A [`Hub`] pairs an outbound [`HubServer`] (invocations tagged with the
//! hub name and a connection-wide sequence id) with an inbound
//! [`HubClient`] (method name → local handler).
//!
//! Routing rules for inbound frames:
//!
//! - legacy batches: every inner message whose `H` matches the hub name
//!   case-insensitively is dispatched by its `M`
//! - core invocations carry no hub name and belong to the active hub
//! - results/completions are dispatched to the handler registered under
//!   the name of the method they answer

use crate::core::connection::Connection;
use crate::core::frame::{Frame, Invocation};
use crate::error::{HubError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Async handler receiving the argument list of an invocation
pub type HandlerFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingInvocation {
    hub: String,
    method: String,
}

/// Outbound invocations awaiting a result, keyed by invocation id
///
/// Cleared at the start of every session: ids from a dead socket are never
/// answered.
#[derive(Debug, Default)]
pub struct PendingInvocations {
    entries: Mutex<HashMap<String, PendingInvocation>>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, id: u64, hub: &str, method: &str) {
        self.entries.lock().insert(
            id.to_string(),
            PendingInvocation {
                hub: hub.to_string(),
                method: method.to_string(),
            },
        );
    }

    /// Remove and return the method name if the id belongs to `hub`
    pub fn take_for(&self, id: &str, hub: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(pending) if pending.hub.eq_ignore_ascii_case(hub) => {
                entries.remove(id).map(|pending| pending.method)
            }
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Named hub: one outbound and one inbound side
pub struct Hub {
    pub name: String,
    pub server: HubServer,
    pub client: HubClient,
}

impl Hub {
    pub(crate) fn new(
        name: &str,
        connection: Weak<Connection>,
        pending: Arc<PendingInvocations>,
        active_hub: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            server: HubServer {
                name: name.to_string(),
                connection,
                pending: Arc::clone(&pending),
            },
            client: HubClient {
                name: name.to_string(),
                handlers: Arc::new(RwLock::new(HashMap::new())),
                pending,
                active_hub,
            },
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("handlers", &self.client.methods())
            .finish()
    }
}

/// Outbound half of a hub
pub struct HubServer {
    name: String,
    connection: Weak<Connection>,
    pending: Arc<PendingInvocations>,
}

impl HubServer {
    /// Queue an invocation of `method` and return its sequence id
    ///
    /// Fire-and-forget: the result, if the server sends one, arrives as an
    /// inbound frame routed to the handler registered under `method`.
    pub fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<u64> {
        let connection = self
            .connection
            .upgrade()
            .ok_or_else(|| HubError::InvalidState("connection has been dropped".into()))?;

        let id = connection.increment_send_counter();
        self.pending.track(id, &self.name, method);
        let invocation = Invocation {
            hub: self.name.clone(),
            method: method.to_string(),
            arguments,
            id,
        };

        if let Err(e) = connection.send(&invocation) {
            self.pending.take_for(&id.to_string(), &self.name);
            return Err(e);
        }
        debug!(hub = %self.name, method, id, "Queued invocation");
        Ok(id)
    }
}

/// Inbound half of a hub: method name → handler
pub struct HubClient {
    name: String,
    handlers: Arc<RwLock<HashMap<String, HandlerFn>>>,
    pending: Arc<PendingInvocations>,
    active_hub: Arc<RwLock<Option<String>>>,
}

impl HubClient {
    /// Register the handler for `method`
    ///
    /// The first registration wins: registering an already-handled method
    /// is ignored (and logged). Returns whether the handler was installed.
    pub fn on<F, Fut>(&self, method: &str, handler: F) -> bool
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(method) {
            warn!(hub = %self.name, method, "Handler already registered, ignoring new one");
            return false;
        }
        let handler: HandlerFn = Arc::new(move |arguments| handler(arguments).boxed());
        handlers.insert(method.to_string(), handler);
        true
    }

    /// Remove the handler for `method`; no-op if none is registered
    pub fn off(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        methods
    }

    fn is_active(&self) -> bool {
        self.active_hub
            .read()
            .as_deref()
            .map(|active| active.eq_ignore_ascii_case(&self.name))
            .unwrap_or(false)
    }

    async fn call(&self, method: &str, arguments: Vec<Value>, warn_if_missing: bool) {
        let handler = self.handlers.read().get(method).cloned();
        match handler {
            Some(handler) => {
                let outcome = std::panic::AssertUnwindSafe(handler(arguments))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(hub = %self.name, method, "Handler failed: {}", e),
                    Err(_) => error!(hub = %self.name, method, "Handler panicked"),
                }
            }
            None if warn_if_missing => {
                warn!(hub = %self.name, method, "No handler for method, ignoring")
            }
            None => debug!(hub = %self.name, method, "No handler for result, ignoring"),
        }
    }

    async fn complete(&self, invocation_id: &str, result: Option<Value>, failed: bool) {
        let Some(method) = self.pending.take_for(invocation_id, &self.name) else {
            trace!(hub = %self.name, invocation_id, "Result for unknown invocation");
            return;
        };
        if failed {
            return;
        }
        let arguments = result.map(|value| vec![value]).unwrap_or_default();
        self.call(&method, arguments, false).await;
    }

    /// Route one inbound frame to this hub's handlers
    pub async fn dispatch(&self, frame: &Frame) {
        match frame {
            Frame::Legacy(envelope) => {
                for message in &envelope.messages {
                    if message.hub.eq_ignore_ascii_case(&self.name) {
                        self.call(&message.method, message.arguments.clone(), true)
                            .await;
                    } else {
                        trace!(hub = %self.name, other = %message.hub, "Frame for another hub");
                    }
                }
                if let Some(id) = &envelope.invocation_id {
                    self.complete(id, envelope.result.clone(), envelope.error.is_some())
                        .await;
                }
            }
            Frame::Invocation {
                target, arguments, ..
            } if self.is_active() => {
                self.call(target, arguments.clone(), true).await;
            }
            Frame::Completion {
                invocation_id,
                result,
                error,
            } if self.is_active() => {
                self.complete(invocation_id, result.clone(), error.is_some())
                    .await;
            }
            _ => {}
        }
    }
}
