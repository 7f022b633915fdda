//! stubwire - bidirectional RPC between local objects and remote stubs.
//!
//! A service is declared once with [`service!`]. The requester side gets a
//! typed client whose methods perform one request/response exchange each;
//! the responder side gets a dispatcher that decodes arguments and invokes
//! the real object. Responses travel back as an envelope carrying either a
//! value or an error message, plus optional push content delivered to the
//! requester's listener.
//!
//! Transports are pluggable. `stubwire-http` provides HTTP and WebSocket
//! ones; [`loopback`] provides in-process ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stubwire::{Bridge, CallContext, CallRouter, MethodResult};
//! use stubwire::loopback::LoopbackTransport;
//!
//! stubwire::service! {
//!     pub trait Calculator(CalculatorClient, CalculatorDispatcher) {
//!         fn add(a: i64, b: i64) -> i64;
//!     }
//! }
//!
//! struct Calc;
//!
//! #[stubwire::async_trait]
//! impl Calculator for Calc {
//!     async fn add(&self, _cx: &CallContext, a: i64, b: i64) -> MethodResult<i64> {
//!         Ok(a + b)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> stubwire::Result<()> {
//!     let router = Arc::new(CallRouter::new());
//!     router.register("calc", CalculatorDispatcher::new(Calc))?;
//!
//!     let bridge = Bridge::new(LoopbackTransport::new(router));
//!     let calc: CalculatorClient = bridge.create_request("calc")?;
//!     assert_eq!(calc.add(2, 3).await?, 5);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod loopback;
pub mod requester;
pub mod responder;
pub mod service;
pub mod transport;
pub mod value;

// Used by the `service!` expansion.
pub use async_trait::async_trait;

pub use bridge::{Bridge, BridgeBuilder};
pub use codec::{Codec, JsonCodec, TypeRegistry};
pub use config::{LoggingConfig, ProtocolConfig};
pub use envelope::{CallEnvelope, ChannelFrame, ResponseEnvelope, WireBody};
pub use error::{BridgeError, Result};
pub use logging::{LogPolicy, LogSink, Observer, TracingSink};
pub use requester::{Listener, Stub};
pub use responder::CallRouter;
pub use service::{
    endpoint_name, endpoint_path, split_endpoint, validate_namespace, Args, CallContext,
    Dispatch, MethodResult, ServiceClient,
};
pub use transport::{
    DuplexChannel, DuplexConnector, EventHandler, EventHandlers, RequestTransport,
};
pub use value::{FromValue, IntoValue, Registered, Value};
