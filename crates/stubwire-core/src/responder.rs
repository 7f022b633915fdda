//! Responder side: dispatching received calls to local objects.
//!
//! Both delivery paths go through [`respond`], which produces exactly one
//! [`ResponseEnvelope`] per received call envelope:
//!
//! - [`CallRouter`] serves the request/response path and returns the encoded
//!   envelope as the reply body.
//! - `Bridge::create_response` serves the duplex path; there the envelope is
//!   not returned and only its `listenerContent` travels back as a push.

use crate::codec::{Codec, JsonCodec, TypeRegistry};
use crate::envelope::{CallEnvelope, ResponseEnvelope};
use crate::error::{BridgeError, Result};
use crate::logging::Observer;
use crate::service::{endpoint_name, split_endpoint, validate_namespace, CallContext, Dispatch};
use crate::value::Value;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A dispatcher bound to a namespace, with the registry for its payloads.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) namespace: Arc<str>,
    pub(crate) dispatcher: Arc<dyn Dispatch>,
    pub(crate) registry: Arc<TypeRegistry>,
}

impl Registration {
    pub(crate) fn new(namespace: &str, dispatcher: Arc<dyn Dispatch>, registry: TypeRegistry) -> Self {
        Self {
            namespace: Arc::from(namespace),
            dispatcher,
            registry: Arc::new(registry),
        }
    }

    fn serves(&self, method: &str) -> bool {
        self.dispatcher.methods().iter().any(|m| *m == method)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "method panicked".to_string()
    }
}

/// Decode one call payload, invoke the method and build its envelope.
///
/// A panicking method still yields an envelope, with the panic message as
/// its `exception`.
pub(crate) async fn respond(
    registration: &Registration,
    method: &str,
    payload: &str,
    codec: &dyn Codec,
    observer: &Observer,
) -> ResponseEnvelope {
    let cx = CallContext::new(&registration.namespace, method);
    let outcome: Result<Value> = AssertUnwindSafe(async {
        let call = CallEnvelope::from_value(codec.decode(payload, &registration.registry)?)?;
        observer.call_reached(cx.endpoint(), payload);
        registration.dispatcher.dispatch(method, call.args, &cx).await
    })
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(BridgeError::remote(panic_message(panic.as_ref()))));

    let envelope = match outcome {
        Ok(value) => ResponseEnvelope::success(value),
        Err(err) => {
            observer.exception(&err);
            ResponseEnvelope::exception(err.to_string())
        }
    };
    envelope.with_listener_content(cx.take_listener_content())
}

/// Endpoint table for the request/response path.
///
/// Hosted by a call server: every `POST /<namespace>.<method>` body is handed
/// to [`CallRouter::handle`], and `POST /<namespace>` to
/// [`CallRouter::announce`].
pub struct CallRouter {
    codec: Arc<dyn Codec>,
    observer: Observer,
    registrations: RwLock<HashMap<String, Registration>>,
    announced: RwLock<BTreeSet<String>>,
}

impl Default for CallRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRouter {
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec))
    }

    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            observer: Observer::default(),
            registrations: RwLock::new(HashMap::new()),
            announced: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn codec(&self) -> Arc<dyn Codec> {
        self.codec.clone()
    }

    /// Register a dispatcher under `namespace` with an empty type registry.
    pub fn register<D: Dispatch>(&self, namespace: &str, dispatcher: D) -> Result<()> {
        self.register_with(namespace, dispatcher, TypeRegistry::new())
    }

    /// Register a dispatcher under `namespace`. A namespace can only be registered once.
    pub fn register_with<D: Dispatch>(
        &self,
        namespace: &str,
        dispatcher: D,
        registry: TypeRegistry,
    ) -> Result<()> {
        validate_namespace(namespace)?;
        let registration = Registration::new(namespace, Arc::new(dispatcher), registry);

        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registrations.contains_key(namespace) {
            let method = registration.dispatcher.methods().first().copied().unwrap_or("");
            return Err(BridgeError::DuplicateEndpoint {
                endpoint: endpoint_name(namespace, method),
            });
        }
        for method in registration.dispatcher.methods() {
            self.observer
                .endpoint_created(&endpoint_name(namespace, method));
        }
        registrations.insert(namespace.to_string(), registration);
        Ok(())
    }

    /// Every registered endpoint name, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let registrations = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut endpoints: Vec<String> = registrations
            .values()
            .flat_map(|r| {
                r.dispatcher
                    .methods()
                    .iter()
                    .map(|m| endpoint_name(&r.namespace, m))
            })
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Record that a peer is about to open a duplex channel for `namespace`.
    pub fn announce(&self, namespace: &str) -> Result<()> {
        validate_namespace(namespace)?;
        debug!("Namespace {} announced", namespace);
        self.announced
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string());
        Ok(())
    }

    pub fn is_announced(&self, namespace: &str) -> bool {
        self.announced
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(namespace)
    }

    fn lookup(&self, endpoint: &str) -> Result<(Registration, String)> {
        let unknown = || BridgeError::UnknownEndpoint {
            endpoint: endpoint.to_string(),
        };
        let (namespace, method) = split_endpoint(endpoint).ok_or_else(unknown)?;
        let registration = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
            .ok_or_else(unknown)?;
        if !registration.serves(method) {
            return Err(unknown());
        }
        Ok((registration, method.to_string()))
    }

    /// Answer one call with its encoded envelope.
    ///
    /// Unknown endpoints and failing methods still produce an envelope, with
    /// `exception` set. The only error is a codec unable to encode even the
    /// fallback exception envelope.
    pub async fn handle(&self, endpoint: &str, payload: &str) -> Result<String> {
        let (envelope, registry) = match self.lookup(endpoint) {
            Ok((registration, method)) => {
                let envelope = respond(
                    &registration,
                    &method,
                    payload,
                    self.codec.as_ref(),
                    &self.observer,
                )
                .await;
                (envelope, registration.registry.clone())
            }
            Err(err) => {
                self.observer.exception(&err);
                (
                    ResponseEnvelope::exception(err.to_string()),
                    Arc::new(TypeRegistry::new()),
                )
            }
        };

        let exception = envelope.is_exception();
        let wire = match self.codec.encode(&envelope.into_value(), &registry) {
            Ok(wire) => wire,
            Err(err) => {
                self.observer.exception(&err);
                self.codec.encode(
                    &ResponseEnvelope::exception(err.to_string()).into_value(),
                    &registry,
                )?
            }
        };
        debug!(
            "Answered {} {}",
            endpoint,
            if exception { "with exception" } else { "successfully" }
        );
        Ok(wire)
    }

    /// Handle a post to `/<segment>`: a bare namespace is an announcement,
    /// anything else a call.
    pub async fn handle_post(&self, segment: &str, payload: &str) -> Result<String> {
        match split_endpoint(segment) {
            Some(_) => self.handle(segment, payload).await,
            None => {
                self.announce(segment)?;
                self.codec.encode(
                    &ResponseEnvelope::success(Value::Null).into_value(),
                    &TypeRegistry::new(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::CaptureSink;
    use crate::logging::LogPolicy;
    use crate::service::MethodResult;

    crate::service! {
        pub trait Counter(CounterClient, CounterDispatcher) {
            fn bump(by: i64) -> i64;
            fn explode(message: String) -> ();
            fn crash(message: String) -> ();
        }
    }

    struct Impl;

    #[crate::async_trait]
    impl Counter for Impl {
        async fn bump(&self, cx: &CallContext, by: i64) -> MethodResult<i64> {
            cx.push("bumped")?;
            Ok(by + 1)
        }

        async fn explode(&self, _cx: &CallContext, message: String) -> MethodResult<()> {
            anyhow::bail!(message)
        }

        async fn crash(&self, cx: &CallContext, message: String) -> MethodResult<()> {
            cx.push("crashing")?;
            panic!("{}", message)
        }
    }

    fn call_payload(args: Vec<Value>) -> String {
        JsonCodec
            .encode(&CallEnvelope::new(args).into_value(), &TypeRegistry::new())
            .unwrap()
    }

    fn decode(wire: &str) -> ResponseEnvelope {
        ResponseEnvelope::from_value(JsonCodec.decode(wire, &TypeRegistry::new()).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope_with_push() {
        let router = CallRouter::new();
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();

        let wire = router
            .handle("counter.bump", &call_payload(vec![Value::Int(41)]))
            .await
            .unwrap();
        let envelope = decode(&wire);
        assert_eq!(envelope.response(), Some(&Value::Int(42)));
        assert!(!envelope.is_exception());
        assert_eq!(envelope.listener_content(), Some(&Value::from("bumped")));
    }

    #[tokio::test]
    async fn test_exception_envelope_carries_message() {
        let router = CallRouter::new();
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();

        let wire = router
            .handle("counter.explode", &call_payload(vec![Value::from("boom")]))
            .await
            .unwrap();
        let envelope = decode(&wire);
        assert_eq!(envelope.exception_message(), Some("boom"));
        assert!(envelope.response().is_none());
    }

    #[tokio::test]
    async fn test_every_failure_still_yields_one_envelope() {
        let router = CallRouter::new();
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();

        for (endpoint, payload) in [
            ("counter.missing", call_payload(vec![])),
            ("other.bump", call_payload(vec![])),
            ("counter", call_payload(vec![])),
            ("counter.bump", "not a payload".to_string()),
            ("counter.bump", call_payload(vec![Value::from("x")])),
        ] {
            let wire = router.handle(endpoint, &payload).await.unwrap();
            assert!(decode(&wire).is_exception(), "{} should fail", endpoint);
        }
    }

    #[tokio::test]
    async fn test_panicking_method_still_yields_envelope() {
        let router = CallRouter::new();
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();

        let wire = router
            .handle("counter.crash", &call_payload(vec![Value::from("kaboom")]))
            .await
            .unwrap();
        let envelope = decode(&wire);
        assert_eq!(envelope.exception_message(), Some("kaboom"));
        assert_eq!(envelope.listener_content(), Some(&Value::from("crashing")));

        // The router keeps serving after a panic.
        let wire = router
            .handle("counter.bump", &call_payload(vec![Value::Int(1)]))
            .await
            .unwrap();
        assert_eq!(decode(&wire).response(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let router = CallRouter::new();
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();
        let err = router
            .register("counter", CounterDispatcher::new(Impl))
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateEndpoint { .. }));
        assert_eq!(
            router.endpoints(),
            vec!["counter.bump", "counter.crash", "counter.explode"]
        );
    }

    #[test]
    fn test_registration_logs_under_create() {
        let router = CallRouter::new();
        let sink = CaptureSink::default();
        router.observer().set_sink(Arc::new(sink.clone()));
        router.observer().set_policy(LogPolicy {
            create: true,
            ..LogPolicy::none()
        });
        router.register("counter", CounterDispatcher::new(Impl)).unwrap();
        assert_eq!(
            sink.lines(),
            vec![
                "creating endpoint for counter.bump",
                "creating endpoint for counter.explode",
                "creating endpoint for counter.crash",
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_post_announces_bare_namespace() {
        let router = CallRouter::new();
        let wire = router.handle_post("counter", "{}").await.unwrap();
        assert!(!decode(&wire).is_exception());
        assert!(router.is_announced("counter"));
        assert!(router.handle_post("bad/ns", "{}").await.is_err());
    }
}
