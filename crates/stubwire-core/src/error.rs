//! Error types for stubwire.
//!
//! Every failure a stub can surface to its caller is one of these variants.
//! Remote method failures only carry the message text across the wire; the
//! original error type is not preserved.

use std::fmt;
use thiserror::Error;

/// Boxed source error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for stubwire.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The request/response exchange or the duplex channel failed.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The codec could not encode or decode a value with the supplied registry.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The remote method failed. Displays exactly the remote message.
    #[error("{0}")]
    RemoteExecution(String),

    #[error("Unknown endpoint: {endpoint}")]
    UnknownEndpoint { endpoint: String },

    #[error("Endpoint already registered: {endpoint}")]
    DuplicateEndpoint { endpoint: String },

    #[error("Invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("No duplex channel connector configured")]
    ChannelUnavailable,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for stubwire operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl BridgeError {
    /// Wrap a transport-level failure, keeping the source for inspection.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BridgeError::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Transport failure without an underlying error value.
    pub fn transport_msg(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        BridgeError::Serialization {
            message: message.into(),
        }
    }

    /// Capture a failed method's message for the `exception` field.
    pub fn remote(err: impl fmt::Display) -> Self {
        BridgeError::RemoteExecution(err.to_string())
    }

    /// True when the error came back from the remote side as an `exception`.
    pub fn is_remote(&self) -> bool {
        matches!(self, BridgeError::RemoteExecution(_))
    }

    /// True when the error happened in the transport rather than in a method.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_message_verbatim() {
        let err = BridgeError::remote("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.is_remote());
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: BridgeError = json_err.into();
        assert!(matches!(err, BridgeError::Serialization { .. }));
    }

    #[test]
    fn test_transport_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = BridgeError::transport(io);
        assert!(err.is_transport());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Transport error: refused");
    }
}
