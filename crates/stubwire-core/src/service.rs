//! Service descriptors: the declared method set of a remote object.
//!
//! [`service!`](crate::service) turns one trait declaration into
//!
//! - the async trait implemented by the real object,
//! - a client type whose methods are remote-call stubs,
//! - a dispatcher that decodes arguments and invokes the real object.
//!
//! ```rust,ignore
//! stubwire::service! {
//!     /// Arithmetic over the wire.
//!     pub trait Calculator(CalculatorClient, CalculatorDispatcher) {
//!         fn add(a: i64, b: i64) -> i64;
//!         fn divide(a: f64, b: f64) -> f64;
//!     }
//! }
//! ```

use crate::config::ProtocolConfig;
use crate::error::{BridgeError, Result};
use crate::value::{FromValue, IntoValue, Value};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Return type of every service method. The error's message is what the caller sees.
pub type MethodResult<T> = anyhow::Result<T>;

/// Check that a namespace can prefix endpoint names unambiguously.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let invalid = |reason: &str| BridgeError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason: reason.to_string(),
    };
    if namespace.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if namespace
        .chars()
        .any(|c| c == ProtocolConfig::ENDPOINT_SEPARATOR || c == '/' || c.is_whitespace())
    {
        return Err(invalid("must not contain '.', '/' or whitespace"));
    }
    Ok(())
}

/// `<namespace>.<method>`
pub fn endpoint_name(namespace: &str, method: &str) -> String {
    format!("{}{}{}", namespace, ProtocolConfig::ENDPOINT_SEPARATOR, method)
}

/// Request path for an endpoint or a bare namespace.
pub fn endpoint_path(endpoint: &str) -> String {
    format!("/{}", endpoint)
}

/// Split `<namespace>.<method>`. `None` for a bare namespace.
pub fn split_endpoint(endpoint: &str) -> Option<(&str, &str)> {
    endpoint.split_once(ProtocolConfig::ENDPOINT_SEPARATOR)
}

/// Per-call context handed to service methods.
#[derive(Debug)]
pub struct CallContext {
    namespace: String,
    method: String,
    endpoint: String,
    listener_content: Mutex<Option<Value>>,
}

impl CallContext {
    pub fn new(namespace: &str, method: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            method: method.to_string(),
            endpoint: endpoint_name(namespace, method),
            listener_content: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Attach push content to this call's response. The last push wins.
    pub fn push(&self, content: impl IntoValue) -> Result<()> {
        let value = content.into_value()?;
        *self
            .listener_content
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }

    pub fn take_listener_content(&self) -> Option<Value> {
        self.listener_content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Positional argument decoder used by generated dispatchers.
///
/// Missing trailing arguments decode from `Null`, so optional parameters may
/// be omitted by the caller. Extra arguments are rejected.
#[derive(Debug)]
pub struct Args {
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Args {
    pub fn new(values: Vec<Value>, expected: usize) -> Result<Self> {
        if values.len() > expected {
            return Err(BridgeError::serialization(format!(
                "expected {} arguments, got {}",
                expected,
                values.len()
            )));
        }
        Ok(Self {
            values: values.into_iter(),
            position: 0,
        })
    }

    pub fn next<T: FromValue>(&mut self) -> Result<T> {
        let position = self.position;
        self.position += 1;
        let value = self.values.next().unwrap_or_default();
        T::from_value(value).map_err(|e| {
            BridgeError::serialization(format!("argument {}: {}", position, e))
        })
    }
}

/// Responder side of a service: invokes the real object by method name.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Method set, in declaration order.
    fn methods(&self) -> &'static [&'static str];

    async fn dispatch(&self, method: &str, args: Vec<Value>, cx: &CallContext) -> Result<Value>;
}

/// Requester side of a service: a typed facade over a [`Stub`](crate::Stub).
pub trait ServiceClient: Sized {
    /// Method set, in declaration order.
    const METHODS: &'static [&'static str];

    fn from_stub(stub: crate::Stub) -> Self;

    fn stub(&self) -> &crate::Stub;
}

/// Declare a service trait with its client stub and dispatcher types.
///
/// Each declared method `fn m(a: A) -> R;` becomes
/// `async fn m(&self, cx: &CallContext, a: A) -> MethodResult<R>` on the trait,
/// `async fn m(&self, a: A) -> Result<R>` on the client. Argument and return
/// types must implement `IntoValue` and `FromValue`.
#[macro_export]
macro_rules! service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident ($client:ident, $dispatcher:ident) {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::async_trait]
        $vis trait $name: Send + Sync + 'static {
            $(
                $(#[$method_meta])*
                async fn $method(
                    &self,
                    cx: &$crate::CallContext
                    $(, $arg: $ty)*
                ) -> $crate::MethodResult<$ret>;
            )*
        }

        #[derive(Debug, Clone)]
        $vis struct $client {
            stub: $crate::Stub,
        }

        impl $client {
            $(
                $(#[$method_meta])*
                pub async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret> {
                    let args = (move || -> $crate::Result<::std::vec::Vec<$crate::Value>> {
                        ::std::result::Result::Ok(::std::vec![
                            $($crate::IntoValue::into_value($arg)?),*
                        ])
                    })();
                    self.stub.invoke::<$ret>(stringify!($method), args).await
                }
            )*
        }

        impl $crate::ServiceClient for $client {
            const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];

            fn from_stub(stub: $crate::Stub) -> Self {
                Self { stub }
            }

            fn stub(&self) -> &$crate::Stub {
                &self.stub
            }
        }

        $vis struct $dispatcher<T> {
            service: ::std::sync::Arc<T>,
        }

        impl<T: $name> $dispatcher<T> {
            pub fn new(service: T) -> Self {
                Self {
                    service: ::std::sync::Arc::new(service),
                }
            }

            pub fn from_arc(service: ::std::sync::Arc<T>) -> Self {
                Self { service }
            }
        }

        #[$crate::async_trait]
        impl<T: $name> $crate::Dispatch for $dispatcher<T> {
            fn methods(&self) -> &'static [&'static str] {
                <$client as $crate::ServiceClient>::METHODS
            }

            async fn dispatch(
                &self,
                method: &str,
                args: ::std::vec::Vec<$crate::Value>,
                cx: &$crate::CallContext,
            ) -> $crate::Result<$crate::Value> {
                $(
                    if method == stringify!($method) {
                        #[allow(unused_mut, unused_variables)]
                        let mut decoder =
                            $crate::Args::new(args, <[&str]>::len(&[$(stringify!($arg)),*]))?;
                        $( let $arg: $ty = decoder.next()?; )*
                        let ret = self
                            .service
                            .$method(cx $(, $arg)*)
                            .await
                            .map_err(|e| $crate::BridgeError::remote(e))?;
                        return $crate::IntoValue::into_value(ret);
                    }
                )*
                Err($crate::BridgeError::UnknownEndpoint {
                    endpoint: cx.endpoint().to_string(),
                })
            }
        }
    };
}
