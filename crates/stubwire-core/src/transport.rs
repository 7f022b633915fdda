//! Transport seams.
//!
//! stubwire needs two collaborators: a one-shot request/response exchange
//! addressed by path, and a persistent duplex channel with named events.
//! `stubwire-http` provides HTTP/WebSocket implementations; [`crate::loopback`]
//! provides in-process ones.

use crate::envelope::{ChannelFrame, WireBody};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Callback invoked with the raw payload of a duplex event.
pub type EventHandler = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// One-shot request/response exchange.
#[async_trait]
pub trait RequestTransport: Send + Sync + 'static {
    /// Post `body` to `path` (always starting with `/`) and return the reply body.
    async fn post(&self, path: &str, body: WireBody) -> Result<WireBody>;
}

/// An open duplex channel.
#[async_trait]
pub trait DuplexChannel: Send + Sync + 'static {
    /// Connection identifier assigned by the server.
    fn id(&self) -> &str;

    /// Subscribe to a named event. Several handlers may share one event.
    fn on(&self, event: &str, handler: EventHandler);

    /// Send a named event to the peer.
    async fn emit(&self, event: &str, payload: String) -> Result<()>;
}

/// Opens duplex channels. `connect` resolves once the server acknowledged the connection.
#[async_trait]
pub trait DuplexConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>>;
}

/// Event name to handler table shared by channel implementations.
#[derive(Default)]
pub struct EventHandlers {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Run every handler subscribed to the frame's event. Returns how many ran.
    pub fn deliver(&self, frame: ChannelFrame) -> usize {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame.event)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(frame.payload.clone());
        }
        handlers.len()
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .is_some_and(|h| !h.is_empty())
    }
}
