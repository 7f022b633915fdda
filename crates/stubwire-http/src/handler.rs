//! Request handlers.

use crate::server::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use stubwire::{BridgeError, ChannelFrame, ProtocolConfig, WireBody};
use tracing::{debug, error, info, warn};

fn error_status(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::InvalidNamespace { .. } | BridgeError::UnknownEndpoint { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sockets": state.hub.connection_count(),
    }))
}

/// `POST /<namespace>.<method>` runs a call; `POST /<namespace>` announces a socket.
pub async fn handle_call(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
    Json(body): Json<WireBody>,
) -> Response {
    debug!("Call to {}", endpoint);

    match state.router.handle_post(&endpoint, &body.json).await {
        Ok(json) => (StatusCode::OK, Json(WireBody::new(json))).into_response(),
        Err(e) => {
            error!("Call to {} failed: {}", endpoint, e);
            (error_status(&e), Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

/// `GET /socket` upgrades to the duplex channel.
pub async fn handle_socket(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: Arc<AppState>, socket: WebSocket) {
    let (id, mut outbound) = state.hub.connect();
    let (mut ws_tx, mut ws_rx) = socket.split();
    info!("Socket {} connected", id);

    let ack = ChannelFrame::new(ProtocolConfig::CONNECT_EVENT, id.clone());
    let acked = match ack.to_text() {
        Ok(text) => ws_tx.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            error!("Failed to encode connect frame: {}", e);
            false
        }
    };
    if !acked {
        state.hub.disconnect(&id);
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match frame.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unencodable {} frame: {}", frame.event, e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match ChannelFrame::from_text(&text) {
                Ok(frame) => state.hub.receive(&id, frame),
                Err(e) => warn!("Socket {} sent a malformed frame: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Socket {} read error: {}", id, e);
                break;
            }
        }
    }

    state.hub.disconnect(&id);
    writer.abort();
    info!("Socket {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use stubwire::{
        CallContext, CallEnvelope, Codec, JsonCodec, MethodResult, ResponseEnvelope,
        TypeRegistry, Value,
    };
    use tower::ServiceExt;

    stubwire::service! {
        pub trait Echo(EchoClient, EchoDispatcher) {
            fn echo(text: String) -> String;
        }
    }

    struct Impl;

    #[stubwire::async_trait]
    impl Echo for Impl {
        async fn echo(&self, _cx: &CallContext, text: String) -> MethodResult<String> {
            Ok(text)
        }
    }

    fn app() -> (axum::Router, Arc<AppState>) {
        let state = Arc::new(AppState::new());
        state.register("echo", EchoDispatcher::new(Impl)).unwrap();
        (build_router(state.clone()), state)
    }

    fn post(uri: &str, json: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&WireBody::new(json)).unwrap(),
            ))
            .unwrap()
    }

    async fn read_body(response: Response) -> WireBody {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn call_json(args: Vec<Value>) -> String {
        JsonCodec
            .encode(&CallEnvelope::new(args).into_value(), &TypeRegistry::new())
            .unwrap()
    }

    fn envelope(body: &WireBody) -> ResponseEnvelope {
        ResponseEnvelope::from_value(JsonCodec.decode(&body.json, &TypeRegistry::new()).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_call_returns_envelope() {
        let (app, _) = app();
        let response = app
            .oneshot(post("/echo.echo", call_json(vec![Value::from("hi")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_body(response).await;
        assert_eq!(envelope(&body).response(), Some(&Value::from("hi")));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_exception_envelope() {
        let (app, _) = app();
        let response = app
            .oneshot(post("/echo.shout", call_json(vec![])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_body(response).await;
        assert_eq!(
            envelope(&body).exception_message(),
            Some("Unknown endpoint: echo.shout")
        );
    }

    #[tokio::test]
    async fn test_announce_namespace() {
        let (app, state) = app();
        let response = app.oneshot(post("/echo", "{}".to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.router.is_announced("echo"));
    }

    #[tokio::test]
    async fn test_invalid_announce_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(post("/bad%20ns", "{}".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
