//! HTTP and WebSocket transports for stubwire, plus an axum call server.
//!
//! The client side plugs [`HttpTransport`] and [`WsConnector`] into a
//! [`stubwire::Bridge`]. The server side hosts a [`stubwire::CallRouter`] and a
//! [`PushHub`] behind `POST /<endpoint>` and `GET /socket`.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stubwire::Bridge;
//! use stubwire_http::{start_server, AppState, HttpTransport, WsConnector};
//!
//! let state = Arc::new(AppState::new());
//! state.register("calc", CalculatorDispatcher::new(Calc))?;
//! let server = start_server(state.clone(), "127.0.0.1", 0).await?;
//!
//! let bridge = Bridge::builder(HttpTransport::new(server.base_url())?)
//!     .connector(WsConnector::new(server.socket_url()))
//!     .build();
//! let calc: CalculatorClient = bridge.create_request("calc")?;
//! ```

pub mod client;
pub mod config;
pub mod handler;
pub mod hub;
pub mod server;
pub mod socket;

pub use client::HttpTransport;
pub use config::HttpConfig;
pub use hub::PushHub;
pub use server::{build_router, start_server, AppState, ServerHandle};
pub use socket::{WsChannel, WsConnector};
