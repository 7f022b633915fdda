//! HTTP server implementation using Axum.

use crate::config::HttpConfig;
use crate::handler::{handle_call, handle_health, handle_socket};
use crate::hub::PushHub;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use stubwire::{BridgeError, CallRouter, Codec, Dispatch, JsonCodec, Result, TypeRegistry};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Request/response endpoints
    pub router: Arc<CallRouter>,
    /// Open duplex sockets
    pub hub: Arc<PushHub>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec))
    }

    /// State whose endpoints and sockets share `codec`.
    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            router: Arc::new(CallRouter::with_codec(codec.clone())),
            hub: Arc::new(PushHub::with_codec(codec)),
        }
    }

    /// Serve `dispatcher` under `namespace`.
    pub fn register<D: Dispatch>(&self, namespace: &str, dispatcher: D) -> Result<()> {
        self.register_with(namespace, dispatcher, TypeRegistry::new())
    }

    pub fn register_with<D: Dispatch>(
        &self,
        namespace: &str,
        dispatcher: D,
        registry: TypeRegistry,
    ) -> Result<()> {
        if HttpConfig::RESERVED_NAMESPACES.iter().any(|r| *r == namespace) {
            return Err(BridgeError::InvalidNamespace {
                namespace: namespace.to_string(),
                reason: "collides with a server route".to_string(),
            });
        }
        self.router.register_with(namespace, dispatcher, registry)
    }
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address (useful when port=0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}{}", self.addr, HttpConfig::SOCKET_PATH)
    }

    /// Stop accepting connections.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Build the router: `GET /health`, `GET /socket`, `POST /:endpoint`.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HttpConfig::HEALTH_PATH, get(handle_health))
        .route(HttpConfig::SOCKET_PATH, get(handle_socket))
        .route("/:endpoint", post(handle_call))
        .layer(DefaultBodyLimit::max(HttpConfig::MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the call server in the background.
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<ServerHandle> {
    let app = build_router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        task,
    })
}
