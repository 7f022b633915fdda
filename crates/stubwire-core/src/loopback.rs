//! In-process transports.
//!
//! [`LoopbackTransport`] hands requests straight to a [`CallRouter`];
//! [`LoopbackConnector`] opens [`LoopbackChannel`]s that record what they
//! emit and let the owner inject frames. Useful for tests and for wiring two
//! halves of one process together.

use crate::envelope::{ChannelFrame, WireBody};
use crate::error::{BridgeError, Result};
use crate::responder::CallRouter;
use crate::transport::{DuplexChannel, DuplexConnector, EventHandler, EventHandlers, RequestTransport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

/// Request transport answering from a local [`CallRouter`].
#[derive(Clone)]
pub struct LoopbackTransport {
    router: Arc<CallRouter>,
}

impl LoopbackTransport {
    pub fn new(router: Arc<CallRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<CallRouter> {
        &self.router
    }
}

#[async_trait]
impl RequestTransport for LoopbackTransport {
    async fn post(&self, path: &str, body: WireBody) -> Result<WireBody> {
        let segment = path
            .strip_prefix('/')
            .ok_or_else(|| BridgeError::transport_msg(format!("path must start with '/': {}", path)))?;
        let json = self.router.handle_post(segment, &body.json).await?;
        Ok(WireBody::new(json))
    }
}

/// Connector handing out in-process channels.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    opened: Arc<Mutex<Vec<Arc<LoopbackChannel>>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels opened so far.
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Most recently opened channel.
    pub fn latest(&self) -> Option<Arc<LoopbackChannel>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl DuplexConnector for LoopbackConnector {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>> {
        // Give concurrent callers a chance to interleave, as a real handshake would.
        tokio::task::yield_now().await;
        let channel = {
            let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            let channel = Arc::new(LoopbackChannel::new(format!("loopback-{}", opened.len() + 1)));
            opened.push(channel.clone());
            channel
        };
        Ok(channel as Arc<dyn DuplexChannel>)
    }
}

/// In-process duplex channel.
pub struct LoopbackChannel {
    id: String,
    handlers: EventHandlers,
    sent: Mutex<Vec<ChannelFrame>>,
}

impl LoopbackChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handlers: EventHandlers::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Inject an event as if the peer had sent it. Returns how many handlers ran.
    pub fn deliver(&self, event: &str, payload: impl Into<String>) -> usize {
        self.handlers.deliver(ChannelFrame::new(event, payload))
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.handlers.is_subscribed(event)
    }

    /// Frames emitted to the peer so far.
    pub fn sent(&self) -> Vec<ChannelFrame> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl DuplexChannel for LoopbackChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers.add(event, handler);
    }

    async fn emit(&self, event: &str, payload: String) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ChannelFrame::new(event, payload));
        Ok(())
    }
}
