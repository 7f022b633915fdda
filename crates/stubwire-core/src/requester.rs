//! Requester side: remote-call stubs.
//!
//! A [`Stub`] turns one method call into one request/response exchange
//! against `/<namespace>.<method>`. Generated service clients wrap a stub.

use crate::bridge::Shared;
use crate::codec::TypeRegistry;
use crate::envelope::{CallEnvelope, ResponseEnvelope, WireBody};
use crate::error::{BridgeError, Result};
use crate::service::{endpoint_name, endpoint_path};
use crate::value::{FromValue, Value};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Callback receiving `listenerContent` pushes.
pub type Listener = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Holds at most one listener. Re-registration replaces it wholesale.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    inner: RwLock<Option<Listener>>,
}

impl ListenerSlot {
    pub(crate) fn set(&self, listener: Listener) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub(crate) fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hand content to the listener. Dropped when none is registered.
    pub(crate) fn notify(&self, content: Value) -> bool {
        let listener = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match listener {
            Some(listener) => {
                listener(content);
                true
            }
            None => false,
        }
    }
}

/// Remote-call stub for one namespace.
///
/// Cheap to clone; every clone shares the owning bridge's transport, codec,
/// logging policy and listener slot.
#[derive(Clone)]
pub struct Stub {
    shared: Arc<Shared>,
    namespace: Arc<str>,
    methods: &'static [&'static str],
    registry: Arc<TypeRegistry>,
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("namespace", &self.namespace)
            .field("methods", &self.methods)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Stub {
    pub(crate) fn new(
        shared: Arc<Shared>,
        namespace: &str,
        methods: &'static [&'static str],
        registry: TypeRegistry,
    ) -> Self {
        Self {
            shared,
            namespace: Arc::from(namespace),
            methods,
            registry: Arc::new(registry),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn methods(&self) -> &'static [&'static str] {
        self.methods
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Invoke `method` remotely with already-converted arguments.
    ///
    /// Failures are logged under `exceptions` and returned unchanged.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke(method, Ok(args)).await
    }

    /// Invoke `method` and convert the response into `R`.
    ///
    /// `args` carries the outcome of converting the caller's arguments, so a
    /// conversion failure on either side of the exchange is logged under
    /// `exceptions` like any other failure.
    pub async fn invoke<R: FromValue>(&self, method: &str, args: Result<Vec<Value>>) -> Result<R> {
        let result = match args {
            Ok(args) => self.exchange(method, args).await.and_then(R::from_value),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.shared.observer.exception(err);
        }
        result
    }

    async fn exchange(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let endpoint = endpoint_name(&self.namespace, method);
        if !self.methods.iter().any(|m| *m == method) {
            return Err(BridgeError::UnknownEndpoint { endpoint });
        }

        let shared = &self.shared;
        let payload = shared
            .codec
            .encode(&CallEnvelope::new(args).into_value(), &self.registry)?;
        shared.observer.request_sent(&endpoint, &payload);

        let body = shared
            .transport
            .post(&endpoint_path(&endpoint), WireBody::new(payload))
            .await?;
        let envelope =
            ResponseEnvelope::from_value(shared.codec.decode(&body.json, &self.registry)?)?;
        shared
            .observer
            .response_received(&endpoint, &body.json, envelope.is_exception());

        let (outcome, listener_content) = envelope.into_parts();
        if let Some(content) = listener_content {
            shared.listener.notify(content);
        }
        outcome.map_err(BridgeError::RemoteExecution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listener_slot_last_registered_wins() {
        let slot = ListenerSlot::default();
        assert!(!slot.notify(Value::Int(1)));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        slot.set(Arc::new(move |_: Value| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = second.clone();
        slot.set(Arc::new(move |_: Value| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(slot.notify(Value::Int(1)));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        slot.clear();
        assert!(!slot.is_set());
        assert!(!slot.notify(Value::Int(2)));
    }
}
