//! The framework instance.
//!
//! A [`Bridge`] owns everything a connection's stubs and responders share:
//! the request transport, the optional duplex connector, the codec, the
//! logging policy and the listener slot. Nothing is process-global; two
//! bridges never observe each other's policy or listener.

use crate::codec::{Codec, JsonCodec, TypeRegistry};
use crate::config::ProtocolConfig;
use crate::envelope::{ResponseEnvelope, WireBody};
use crate::error::{BridgeError, Result};
use crate::logging::{LogPolicy, LogSink, Observer, TracingSink};
use crate::requester::{ListenerSlot, Stub};
use crate::responder::{respond, Registration};
use crate::service::{endpoint_name, endpoint_path, validate_namespace, Dispatch, ServiceClient};
use crate::transport::{DuplexChannel, DuplexConnector, EventHandler, RequestTransport};
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// State shared by a bridge and every stub it created.
pub(crate) struct Shared {
    pub(crate) observer: Observer,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) transport: Arc<dyn RequestTransport>,
    pub(crate) listener: ListenerSlot,
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder {
    transport: Arc<dyn RequestTransport>,
    connector: Option<Arc<dyn DuplexConnector>>,
    codec: Arc<dyn Codec>,
    policy: LogPolicy,
    sink: Arc<dyn LogSink>,
    push_types: TypeRegistry,
}

impl BridgeBuilder {
    /// Enable the duplex channel.
    pub fn connector(mut self, connector: impl DuplexConnector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn log_policy(mut self, policy: LogPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn logger(mut self, sink: impl LogSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Types allowed in `listenerContent` pushed over the duplex channel.
    pub fn push_types(mut self, registry: TypeRegistry) -> Self {
        self.push_types = registry;
        self
    }

    pub fn build(self) -> Bridge {
        Bridge {
            shared: Arc::new(Shared {
                observer: Observer::new(self.policy, self.sink),
                codec: self.codec,
                transport: self.transport,
                listener: ListenerSlot::default(),
            }),
            connector: self.connector,
            push_registry: Arc::new(self.push_types),
            socket: OnceCell::new(),
            responders: Mutex::new(HashSet::new()),
        }
    }
}

/// One framework instance, scoped to one logical connection.
pub struct Bridge {
    shared: Arc<Shared>,
    connector: Option<Arc<dyn DuplexConnector>>,
    push_registry: Arc<TypeRegistry>,
    socket: OnceCell<Arc<dyn DuplexChannel>>,
    responders: Mutex<HashSet<String>>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("observer", &self.shared.observer)
            .field("listener", &self.shared.listener.is_set())
            .field("duplex", &self.connector.is_some())
            .field("socket", &self.socket.get().map(|s| s.id().to_string()))
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn builder(transport: impl RequestTransport) -> BridgeBuilder {
        BridgeBuilder {
            transport: Arc::new(transport),
            connector: None,
            codec: Arc::new(JsonCodec),
            policy: LogPolicy::none(),
            sink: Arc::new(TracingSink),
            push_types: TypeRegistry::new(),
        }
    }

    /// Bridge with the JSON codec, no duplex channel and nothing logged.
    pub fn new(transport: impl RequestTransport) -> Self {
        Self::builder(transport).build()
    }

    /// Replace the log sink.
    pub fn set_logger(&self, sink: impl LogSink) {
        self.shared.observer.set_sink(Arc::new(sink));
    }

    /// Replace the logging policy. Applies to the next line logged.
    pub fn set_log_level(&self, policy: LogPolicy) {
        self.shared.observer.set_policy(policy);
    }

    pub fn log_policy(&self) -> LogPolicy {
        self.shared.observer.policy()
    }

    /// Register the listener for `listenerContent`, replacing any previous one.
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.listener.set(Arc::new(listener));
    }

    pub fn clear_listener(&self) {
        self.shared.listener.clear();
    }

    /// Typed client for the remote object under `namespace`. Performs no I/O.
    pub fn create_request<C: ServiceClient>(&self, namespace: &str) -> Result<C> {
        self.create_request_with(namespace, TypeRegistry::new())
    }

    pub fn create_request_with<C: ServiceClient>(
        &self,
        namespace: &str,
        registry: TypeRegistry,
    ) -> Result<C> {
        self.create_stub(namespace, C::METHODS, registry)
            .map(C::from_stub)
    }

    /// Untyped stub over an explicit method set.
    pub fn create_stub(
        &self,
        namespace: &str,
        methods: &'static [&'static str],
        registry: TypeRegistry,
    ) -> Result<Stub> {
        validate_namespace(namespace)?;
        debug!("Created stub for {} ({} methods)", namespace, methods.len());
        Ok(Stub::new(self.shared.clone(), namespace, methods, registry))
    }

    /// Serve `dispatcher` on the duplex channel under `namespace`.
    ///
    /// Opens the channel first if this bridge has not done so yet. Each
    /// method subscribes to the `<namespace>.<method>` event.
    pub async fn create_response<D: Dispatch>(&self, namespace: &str, dispatcher: D) -> Result<()> {
        self.create_response_with(namespace, dispatcher, TypeRegistry::new())
            .await
    }

    pub async fn create_response_with<D: Dispatch>(
        &self,
        namespace: &str,
        dispatcher: D,
        registry: TypeRegistry,
    ) -> Result<()> {
        validate_namespace(namespace)?;
        let channel = self.init_socket(namespace).await?;

        let registration = Registration::new(namespace, Arc::new(dispatcher), registry);
        let methods = registration.dispatcher.methods();
        let inserted = self
            .responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string());
        if !inserted {
            return Err(BridgeError::DuplicateEndpoint {
                endpoint: endpoint_name(namespace, methods.first().copied().unwrap_or("")),
            });
        }

        for &method in methods {
            let endpoint = endpoint_name(namespace, method);
            self.shared.observer.endpoint_created(&endpoint);
            channel.on(
                &endpoint,
                self.duplex_handler(registration.clone(), method, &channel),
            );
        }
        Ok(())
    }

    /// Announce `namespace` and open the duplex channel, once per bridge.
    ///
    /// Concurrent and repeated calls share the first channel; later
    /// namespaces are not announced again.
    pub async fn init_socket(&self, namespace: &str) -> Result<Arc<dyn DuplexChannel>> {
        let result = match validate_namespace(namespace) {
            Ok(()) => self
                .socket
                .get_or_try_init(|| self.open_socket(namespace))
                .await
                .cloned(),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.shared.observer.exception(err);
        }
        result
    }

    /// The duplex channel, if it has been opened.
    pub fn socket(&self) -> Option<Arc<dyn DuplexChannel>> {
        self.socket.get().cloned()
    }

    async fn open_socket(&self, namespace: &str) -> Result<Arc<dyn DuplexChannel>> {
        let connector = self
            .connector
            .clone()
            .ok_or(BridgeError::ChannelUnavailable)?;

        let announcement = self
            .shared
            .codec
            .encode(&Value::Map(BTreeMap::new()), &TypeRegistry::new())?;
        self.shared
            .transport
            .post(&endpoint_path(namespace), WireBody::new(announcement))
            .await?;

        let channel = connector.connect().await?;
        self.shared
            .observer
            .always(&format!("Connected to socket {}", channel.id()));
        channel.on(ProtocolConfig::LISTENER_EVENT, self.push_handler());
        Ok(channel)
    }

    /// Handler for `listener` frames: decode and hand to the listener slot.
    fn push_handler(&self) -> EventHandler {
        let shared = self.shared.clone();
        let registry = self.push_registry.clone();
        Arc::new(move |payload: String| {
            shared.observer.push_received(&payload);
            let content = shared
                .codec
                .decode(&payload, &registry)
                .and_then(ResponseEnvelope::from_value)
                .map(|envelope| envelope.into_parts().1);
            match content {
                Ok(Some(content)) => {
                    shared.listener.notify(content);
                }
                Ok(None) => {}
                Err(err) => shared.observer.exception(&err),
            }
        })
    }

    /// Handler for one method event. Dispatch runs on its own task and
    /// returns nothing to the peer except pushed `listenerContent`.
    fn duplex_handler(
        &self,
        registration: Registration,
        method: &'static str,
        channel: &Arc<dyn DuplexChannel>,
    ) -> EventHandler {
        let shared = self.shared.clone();
        let channel: Weak<dyn DuplexChannel> = Arc::downgrade(channel);
        Arc::new(move |payload: String| {
            let shared = shared.clone();
            let registration = registration.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                let envelope = respond(
                    &registration,
                    method,
                    &payload,
                    shared.codec.as_ref(),
                    &shared.observer,
                )
                .await;
                let Some(content) = envelope.into_parts().1 else {
                    return;
                };
                let Some(channel) = channel.upgrade() else {
                    warn!("Channel closed before listener content could be pushed");
                    return;
                };
                let pushed = shared.codec.encode(
                    &ResponseEnvelope::listener_only(content).into_value(),
                    &registration.registry,
                );
                let sent = match pushed {
                    Ok(text) => channel.emit(ProtocolConfig::LISTENER_EVENT, text).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = sent {
                    shared.observer.exception(&err);
                }
            });
        })
    }
}
