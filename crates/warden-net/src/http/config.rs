//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Certificate handling for `https://` requests.
///
/// Scripts run behind a driver the host chose, typically a monitored proxy,
/// so the sandbox default accepts any certificate. Hosts that reach the
/// network directly should select [`TlsPolicy::Verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Skip certificate and hostname validation.
    #[default]
    AcceptInvalidCerts,
    /// Validate against the system trust store.
    Verify,
}

/// Time bounds and limits applied to every request.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use warden_net::http::{TlsPolicy, TransportConfig};
///
/// let config = TransportConfig::new()
///     .with_request_timeout(Duration::from_secs(5))
///     .with_tls_policy(TlsPolicy::Verify);
/// assert_eq!(config.tls_handshake_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on the whole exchange, body reads included.
    pub request_timeout: Duration,
    /// Bound on the TLS handshake.
    pub tls_handshake_timeout: Duration,
    /// Bound on waiting for the response head once the request is sent.
    pub response_header_timeout: Duration,
    /// How long to wait for `100 Continue` before sending the body anyway.
    pub expect_continue_timeout: Duration,
    /// Certificate policy.
    pub tls_policy: TlsPolicy,
    /// Largest accepted response head.
    pub max_header_bytes: usize,
    /// `User-Agent` sent when the request sets none.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(45),
            tls_handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
            tls_policy: TlsPolicy::default(),
            max_header_bytes: 64 * 1024,
            user_agent: concat!("warden/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorter bounds and verified certificates.
    pub fn strict() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            tls_handshake_timeout: Duration::from_secs(5),
            response_header_timeout: Duration::from_secs(5),
            tls_policy: TlsPolicy::Verify,
            ..Self::default()
        }
    }

    /// Set the overall request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout.
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    /// Set the response header timeout.
    pub fn with_response_header_timeout(mut self, timeout: Duration) -> Self {
        self.response_header_timeout = timeout;
        self
    }

    /// Set the `Expect: 100-continue` wait.
    pub fn with_expect_continue_timeout(mut self, timeout: Duration) -> Self {
        self.expect_continue_timeout = timeout;
        self
    }

    /// Set the certificate policy.
    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Set the default `User-Agent`.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
