//! Duplex channel over WebSocket.
//!
//! Each text message is one JSON [`ChannelFrame`]. The server opens with a
//! `connect` frame carrying the connection id; [`WsConnector::connect`]
//! resolves only after receiving it.

use crate::config::HttpConfig;
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use std::sync::Arc;
use stubwire::{
    BridgeError, ChannelFrame, DuplexChannel, DuplexConnector, EventHandler, EventHandlers,
    ProtocolConfig, Result,
};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Opens WebSocket channels to a stubwire server.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for a full socket URL, e.g. `ws://127.0.0.1:8080/socket`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Derive the socket URL from the HTTP base URL of the same server.
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        Self::new(format!("{}{}", base, HttpConfig::SOCKET_PATH))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn wait_for_connect<S>(stream: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message.map_err(BridgeError::transport)? {
            Message::Text(text) => {
                let frame = ChannelFrame::from_text(&text)?;
                if frame.event == ProtocolConfig::CONNECT_EVENT {
                    return Ok(frame.payload);
                }
                debug!("Ignoring {} frame before connect", frame.event);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(BridgeError::transport_msg(
        "socket closed before connect acknowledgment",
    ))
}

#[async_trait]
impl DuplexConnector for WsConnector {
    async fn connect(&self) -> Result<Arc<dyn DuplexChannel>> {
        debug!("Connecting to {}", self.url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(BridgeError::transport)?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let id = tokio::time::timeout(ProtocolConfig::CONNECT_TIMEOUT, wait_for_connect(&mut ws_rx))
            .await
            .map_err(|_| BridgeError::transport_msg("timed out waiting for connect acknowledgment"))??;

        let (outbound, mut queue) = mpsc::unbounded_channel::<ChannelFrame>();
        tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                let text = match frame.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable {} frame: {}", frame.event, e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    warn!("Socket send failed: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let handlers = Arc::new(EventHandlers::new());
        let reader_handlers = handlers.clone();
        let reader_id = id.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Socket {} error: {}", reader_id, e);
                        break;
                    }
                };
                match ChannelFrame::from_text(&text) {
                    Ok(frame) => {
                        let event = frame.event.clone();
                        if reader_handlers.deliver(frame) == 0 {
                            debug!("No handler for {} on socket {}", event, reader_id);
                        }
                    }
                    Err(e) => warn!("Socket {} sent a malformed frame: {}", reader_id, e),
                }
            }
            info!("Socket {} closed", reader_id);
        });

        Ok(Arc::new(WsChannel {
            id,
            handlers,
            outbound,
            reader: reader.abort_handle(),
        }) as Arc<dyn DuplexChannel>)
    }
}

/// An open WebSocket channel. Dropping it closes the connection.
pub struct WsChannel {
    id: String,
    handlers: Arc<EventHandlers>,
    outbound: mpsc::UnboundedSender<ChannelFrame>,
    reader: AbortHandle,
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl DuplexChannel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers.add(event, handler);
    }

    async fn emit(&self, event: &str, payload: String) -> Result<()> {
        self.outbound
            .send(ChannelFrame::new(event, payload))
            .map_err(|_| BridgeError::transport_msg(format!("socket {} is closed", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_base_url() {
        assert_eq!(
            WsConnector::from_base_url("http://127.0.0.1:8080/").url(),
            "ws://127.0.0.1:8080/socket"
        );
        assert_eq!(
            WsConnector::from_base_url("https://example.com").url(),
            "wss://example.com/socket"
        );
    }

    #[tokio::test]
    async fn test_secure_url_attempts_tls_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let err = WsConnector::new(format!("wss://{}/socket", addr))
            .connect()
            .await
            .err()
            .unwrap();
        assert!(err.is_transport());
        assert!(!err.to_string().contains("TLS support not compiled in"));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsConnector::new(format!("ws://{}/socket", addr))
            .connect()
            .await
            .err()
            .unwrap();
        assert!(err.is_transport());
    }
}
