//! Error types for path discovery operations.

use std::net::IpAddr;
use thiserror::Error;

/// Main error type for path discovery operations.
#[derive(Error, Debug)]
pub enum TraceError {
    // Socket/IO errors
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Failed to bind to address {addr}: {source}")]
    SocketBind {
        addr: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    // Packet errors
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Failed to parse {layer} layer: {reason}")]
    PacketParseFailed { layer: &'static str, reason: String },

    #[error("Packet did not match an outstanding probe")]
    PacketMismatch,

    // Configuration errors
    #[error("Unsupported address family: {0}")]
    UnsupportedAddressFamily(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TraceError {
    /// Returns true if this error is per-packet noise rather than a failure.
    ///
    /// Raw sockets capture whatever traffic reaches the host, so undersized
    /// or unrelated packets are expected; a receiver keeps reading past them.
    pub fn is_noise(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. } | Self::PacketParseFailed { .. } | Self::PacketMismatch
        )
    }
}

/// Result type alias for path discovery operations.
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_classification() {
        assert!(TraceError::PacketTooShort {
            expected: 60,
            actual: 12
        }
        .is_noise());
        assert!(TraceError::PacketMismatch.is_noise());
        assert!(TraceError::PacketParseFailed {
            layer: "TCP",
            reason: "test".into()
        }
        .is_noise());

        assert!(!TraceError::UnsupportedAddressFamily("ip5").is_noise());
        assert!(!TraceError::SocketCreation(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied
        ))
        .is_noise());
    }
}
