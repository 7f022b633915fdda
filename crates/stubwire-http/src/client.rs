//! Request/response transport over HTTP.
//!
//! Every exchange is a `POST` of a JSON `{"json": ...}` body; the reply has
//! the same shape. Non-2xx statuses are transport failures.

use crate::config::HttpConfig;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use stubwire::{BridgeError, RequestTransport, Result, WireBody};
use tracing::debug;

/// [`RequestTransport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Transport posting to `base_url`, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, HttpConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(HttpConfig::USER_AGENT)
            .build()
            .map_err(BridgeError::transport)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn post(&self, path: &str, body: WireBody) -> Result<WireBody> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(BridgeError::transport)?
            .error_for_status()
            .map_err(BridgeError::transport)?;

        response
            .json::<WireBody>()
            .await
            .map_err(BridgeError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let transport = HttpTransport::new("http://localhost:9000/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:9000");
        assert_eq!(transport.url("/calc.add"), "http://localhost:9000/calc.add");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(format!("http://{}", addr)).unwrap();
        let err = transport
            .post("/calc.add", WireBody::new("{}"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
