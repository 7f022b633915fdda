//! HTTP transport configuration.

use std::time::Duration;
use stubwire::ProtocolConfig;

/// Paths, timeouts and names used by the HTTP client and server.
pub struct HttpConfig;

impl HttpConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("stubwire/", env!("CARGO_PKG_VERSION"));

    pub const HEALTH_PATH: &'static str = "/health";
    pub const SOCKET_PATH: &'static str = "/socket";

    /// Largest accepted `POST` body. The envelope travels as an escaped JSON
    /// string, so this leaves room for escaping up to the codec's own limit.
    pub const MAX_BODY_SIZE: usize = 2 * ProtocolConfig::MAX_MESSAGE_SIZE + 1024;

    /// Namespaces that would collide with the server's fixed routes.
    pub const RESERVED_NAMESPACES: &'static [&'static str] = &["health", "socket"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_namespaces_match_paths() {
        for path in [HttpConfig::HEALTH_PATH, HttpConfig::SOCKET_PATH] {
            let name = path.trim_start_matches('/');
            assert!(HttpConfig::RESERVED_NAMESPACES.contains(&name));
        }
        assert!(HttpConfig::USER_AGENT.starts_with("stubwire/"));
    }

    #[test]
    fn test_body_limit_covers_codec_limit() {
        assert!(HttpConfig::MAX_BODY_SIZE > ProtocolConfig::MAX_MESSAGE_SIZE);
    }
}
