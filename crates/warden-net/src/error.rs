//! Error types for network drivers, HTTP and name resolution.

use std::io;

use thiserror::Error;

use crate::driver::Network;

/// Errors produced by drivers and the modules built on them.
#[derive(Debug, Error)]
pub enum NetError {
    /// The dial deadline elapsed before the connection was established.
    #[error("Dial timeout: {address}")]
    DialTimeout {
        /// Requested destination.
        address: String,
    },

    /// The dial was cancelled through its context.
    #[error("Dial canceled: {address}")]
    DialCanceled {
        /// Requested destination.
        address: String,
    },

    /// The upstream proxy refused or botched the tunnel.
    #[error("Proxy negotiation failed: proxy={proxy}, target={target}: {reason}")]
    ProxyNegotiationFailed {
        /// Proxy endpoint (credentials stripped).
        proxy: String,
        /// Tunnel destination.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// The driver cannot carry this network.
    #[error("Unsupported network '{network}' for {driver} driver")]
    UnsupportedNetwork {
        /// Driver name.
        driver: String,
        /// Requested network.
        network: Network,
    },

    /// A network name other than tcp/udp.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Address without a usable host or port.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The connect attempt itself failed (refused, unreachable, ...).
    #[error("Connect to {address} failed: {source}")]
    Connect {
        /// Requested destination.
        address: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A post-dial phase exceeded its time bound.
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// A post-dial phase was cancelled.
    #[error("Request canceled")]
    Canceled,

    /// A response decoding layer could not be set up.
    #[error("Decode failed in {layer} layer: {reason}")]
    DecodeFailed {
        /// Layer name (`gzip`, `charset`).
        layer: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Malformed or unsupported URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Peer spoke something other than what we expected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Name resolution failure.
    #[error("DNS error: {0}")]
    Dns(String),

    /// Other IO failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Whether this error reports an elapsed time bound.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::DialTimeout { .. } | Self::Timeout(_) => true,
            Self::Io(e) => matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock),
            _ => false,
        }
    }

    /// Whether this error reports cancellation, including a body read
    /// stopped by a cancelled context.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::DialCanceled { .. } | Self::Canceled => true,
            Self::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<NetError>())
                .is_some_and(NetError::is_canceled),
            _ => false,
        }
    }
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = NetError::DialTimeout {
            address: "example.com:80".into(),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_canceled());
        assert!(timeout.to_string().contains("example.com:80"));

        let canceled = NetError::Canceled;
        assert!(canceled.is_canceled());

        let io = NetError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(io.is_timeout());
    }

    #[test]
    fn test_canceled_body_read_is_classified() {
        let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, NetError::Canceled);
        assert!(NetError::from(aborted).is_canceled());

        let reset = io::Error::new(io::ErrorKind::ConnectionAborted, "reset by peer");
        assert!(!NetError::from(reset).is_canceled());
    }
}
