//! Centralized protocol configuration.
//!
//! Wire-level names and limits shared by the requester, the responder and
//! every transport implementation.

use std::time::Duration;

/// Protocol-level constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Separates the namespace from the method in an endpoint name.
    pub const ENDPOINT_SEPARATOR: char = '.';

    /// Duplex event the server sends once a channel is ready. Payload is the connection id.
    pub const CONNECT_EVENT: &'static str = "connect";

    /// Duplex event carrying an encoded envelope with only `listenerContent`.
    pub const LISTENER_EVENT: &'static str = "listener";

    /// Largest encoded envelope the codec will decode.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// How long a connector waits for the `connect` acknowledgment.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Logging-related configuration.
pub struct LoggingConfig;

impl LoggingConfig {
    /// Environment variable read by `LogPolicy::from_env`.
    pub const ENV_VAR: &'static str = "STUBWIRE_LOG";

    /// `tracing` target used by the default log sink.
    pub const TARGET: &'static str = "stubwire";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_events_are_distinct() {
        assert_ne!(ProtocolConfig::CONNECT_EVENT, ProtocolConfig::LISTENER_EVENT);
        assert!(!ProtocolConfig::CONNECT_EVENT.contains(ProtocolConfig::ENDPOINT_SEPARATOR));
        assert!(!ProtocolConfig::LISTENER_EVENT.contains(ProtocolConfig::ENDPOINT_SEPARATOR));
    }

    #[test]
    fn test_limits_are_reasonable() {
        assert!(ProtocolConfig::MAX_MESSAGE_SIZE >= 1024 * 1024);
        assert!(ProtocolConfig::CONNECT_TIMEOUT > Duration::ZERO);
    }
}
