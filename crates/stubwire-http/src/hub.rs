//! Server side of the duplex channel.
//!
//! Tracks connected sockets and sends them frames: `listener` pushes for
//! requesters, and fire-and-forget method calls for peers that registered
//! responders on their channel.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use stubwire::{
    endpoint_name, validate_namespace, CallEnvelope, ChannelFrame, Codec, IntoValue, JsonCodec,
    Listener, ProtocolConfig, ResponseEnvelope, Result, TypeRegistry, Value,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

type Outbound = mpsc::UnboundedSender<ChannelFrame>;

/// Registry of open sockets.
pub struct PushHub {
    codec: Arc<dyn Codec>,
    connections: RwLock<HashMap<String, Outbound>>,
    listener: RwLock<Option<(Arc<TypeRegistry>, Listener)>>,
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHub {
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec))
    }

    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            connections: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
        }
    }

    /// Register a new socket. Frames sent to it arrive on the returned receiver.
    pub(crate) fn connect(&self) -> (String, mpsc::UnboundedReceiver<ChannelFrame>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);
        (id, rx)
    }

    pub(crate) fn disconnect(&self, id: &str) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Send one frame to every socket. Returns how many accepted it.
    fn broadcast(&self, frame: ChannelFrame) -> usize {
        let mut closed = Vec::new();
        let mut sent = 0;
        {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in connections.iter() {
                if tx.send(frame.clone()).is_ok() {
                    sent += 1;
                } else {
                    closed.push(id.clone());
                }
            }
        }
        for id in closed {
            self.disconnect(&id);
        }
        sent
    }

    /// Push `content` to every socket's listener.
    pub fn push(&self, content: impl IntoValue, registry: &TypeRegistry) -> Result<usize> {
        let envelope = ResponseEnvelope::listener_only(content.into_value()?);
        let payload = self.codec.encode(&envelope.into_value(), registry)?;
        let sent = self.broadcast(ChannelFrame::new(ProtocolConfig::LISTENER_EVENT, payload));
        debug!("Pushed listener content to {} sockets", sent);
        Ok(sent)
    }

    /// Invoke `<namespace>.<method>` on every socket that serves it.
    ///
    /// No return value comes back; content the method pushes arrives at the
    /// listener set with [`PushHub::set_listener`].
    pub fn call(
        &self,
        namespace: &str,
        method: &str,
        args: Vec<Value>,
        registry: &TypeRegistry,
    ) -> Result<usize> {
        validate_namespace(namespace)?;
        let endpoint = endpoint_name(namespace, method);
        let payload = self
            .codec
            .encode(&CallEnvelope::new(args).into_value(), registry)?;
        let sent = self.broadcast(ChannelFrame::new(endpoint.clone(), payload));
        debug!("Sent {} to {} sockets", endpoint, sent);
        Ok(sent)
    }

    /// Receive `listener` frames coming from sockets. Replaces any previous listener.
    pub fn set_listener<F>(&self, registry: TypeRegistry, listener: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) =
            Some((Arc::new(registry), Arc::new(listener)));
    }

    pub fn clear_listener(&self) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Handle a frame sent by socket `id`.
    pub(crate) fn receive(&self, id: &str, frame: ChannelFrame) {
        if frame.event != ProtocolConfig::LISTENER_EVENT {
            debug!("Ignoring {} frame from socket {}", frame.event, id);
            return;
        }
        let Some((registry, listener)) = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            debug!("No listener for content from socket {}", id);
            return;
        };

        let content = self
            .codec
            .decode(&frame.payload, &registry)
            .and_then(ResponseEnvelope::from_value)
            .map(|envelope| envelope.into_parts().1);
        match content {
            Ok(Some(content)) => listener(content),
            Ok(None) => {}
            Err(e) => warn!("Socket {} pushed undecodable content: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn decode_envelope(payload: &str) -> ResponseEnvelope {
        ResponseEnvelope::from_value(JsonCodec.decode(payload, &TypeRegistry::new()).unwrap())
            .unwrap()
    }

    #[test]
    fn test_push_reaches_every_socket() {
        let hub = PushHub::new();
        let (_, mut a) = hub.connect();
        let (_, mut b) = hub.connect();
        assert_eq!(hub.connection_count(), 2);

        assert_eq!(hub.push("progress", &TypeRegistry::new()).unwrap(), 2);
        for rx in [&mut a, &mut b] {
            let frame = rx.try_recv().unwrap();
            assert_eq!(frame.event, ProtocolConfig::LISTENER_EVENT);
            assert_eq!(
                decode_envelope(&frame.payload).listener_content(),
                Some(&Value::from("progress"))
            );
        }
    }

    #[test]
    fn test_closed_sockets_are_pruned() {
        let hub = PushHub::new();
        let (_, rx) = hub.connect();
        let (id, _kept) = hub.connect();
        drop(rx);

        assert_eq!(hub.push(1i64, &TypeRegistry::new()).unwrap(), 1);
        assert_eq!(hub.connection_count(), 1);
        hub.disconnect(&id);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_call_frames_endpoint_event() {
        let hub = PushHub::new();
        let (_, mut rx) = hub.connect();
        hub.call("display", "show", vec![Value::from("hi")], &TypeRegistry::new())
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "display.show");
        let call = CallEnvelope::from_value(
            JsonCodec.decode(&frame.payload, &TypeRegistry::new()).unwrap(),
        )
        .unwrap();
        assert_eq!(call.args, vec![Value::from("hi")]);
        assert!(hub.call("bad.ns", "show", vec![], &TypeRegistry::new()).is_err());
    }

    #[test]
    fn test_receive_hands_listener_frames_to_listener() {
        let hub = PushHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        hub.set_listener(TypeRegistry::new(), move |content| {
            captured.lock().unwrap().push(content)
        });

        let payload = JsonCodec
            .encode(
                &ResponseEnvelope::listener_only(Value::from("shown")).into_value(),
                &TypeRegistry::new(),
            )
            .unwrap();
        hub.receive("s1", ChannelFrame::new(ProtocolConfig::LISTENER_EVENT, payload.clone()));
        hub.receive("s1", ChannelFrame::new("display.show", payload.clone()));
        hub.receive("s1", ChannelFrame::new(ProtocolConfig::LISTENER_EVENT, "garbage"));

        assert_eq!(*seen.lock().unwrap(), vec![Value::from("shown")]);

        hub.clear_listener();
        hub.receive("s1", ChannelFrame::new(ProtocolConfig::LISTENER_EVENT, payload));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
