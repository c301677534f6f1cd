//! Host configuration, loadable from TOML.
//!
//! ```toml
//! [pool]
//! max_contexts = 4
//! execution_timeout = 10000 # milliseconds
//!
//! [net]
//! proxy = "socks5://127.0.0.1:1080"
//! tls = "verify"
//!
//! [fs]
//! root = "./sandbox"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_core::PoolConfig;
use warden_net::ResolverConfig;
use warden_net::http::{TlsPolicy, TransportConfig};

use crate::error::{WardenError, WardenResult};

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Execution pool settings.
    pub pool: PoolConfig,
    /// Network settings shared by every network module.
    pub net: NetConfig,
    /// Filesystem confinement.
    pub fs: FsConfig,
}

impl WardenConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> WardenResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WardenError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> WardenResult<String> {
        toml::to_string_pretty(self).map_err(|e| WardenError::Config(e.to_string()))
    }

    /// Reject settings no host could run with.
    pub fn validate(&self) -> WardenResult<()> {
        if self.pool.max_contexts == 0 {
            return Err(WardenError::Config("pool.max_contexts must be at least 1".into()));
        }
        if self.net.request_timeout_secs == 0 || self.net.dial_timeout_secs == 0 {
            return Err(WardenError::Config("net timeouts must be positive".into()));
        }
        if self.net.dns_servers.is_empty() {
            return Err(WardenError::Config("net.dns_servers must not be empty".into()));
        }
        Ok(())
    }

    /// Set the pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Route all script traffic through `proxy` (`http://` or `socks5://`).
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.net.proxy = Some(proxy.into());
        self
    }

    /// Set the filesystem root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fs.root = root.into();
        self
    }
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Upstream proxy URL; `None` dials directly.
    pub proxy: Option<String>,
    /// Bound on one HTTP exchange.
    pub request_timeout_secs: u64,
    /// Default dial timeout of `net.tcp` and `net.udp`.
    pub dial_timeout_secs: u64,
    /// Certificate policy for `https://`.
    pub tls: TlsPolicy,
    /// Overrides the default `User-Agent`.
    pub user_agent: Option<String>,
    /// DNS servers as `host:port`.
    pub dns_servers: Vec<String>,
    /// Bound on one DNS exchange.
    pub dns_timeout_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        let resolver = ResolverConfig::default();
        let transport = TransportConfig::default();
        Self {
            proxy: None,
            request_timeout_secs: transport.request_timeout.as_secs(),
            dial_timeout_secs: 30,
            tls: transport.tls_policy,
            user_agent: None,
            dns_servers: resolver.servers,
            dns_timeout_secs: resolver.timeout.as_secs(),
        }
    }
}

impl NetConfig {
    /// HTTP transport settings.
    pub fn transport(&self) -> TransportConfig {
        let config = TransportConfig::new()
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_tls_policy(self.tls);
        match &self.user_agent {
            Some(agent) => config.with_user_agent(agent.clone()),
            None => config,
        }
    }

    /// Resolver settings.
    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig::new()
            .with_servers(self.dns_servers.iter().cloned())
            .with_timeout(Duration::from_secs(self.dns_timeout_secs))
    }

    /// Dial timeout for socket modules.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// Filesystem confinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Directory scripts see as `/`. Must exist.
    pub root: PathBuf,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.pool, PoolConfig::default());
        assert!(config.net.proxy.is_none());
        assert_eq!(config.net.dns_servers.len(), 2);
        assert_eq!(config.fs.root, PathBuf::from("."));
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_partial() {
        let config = WardenConfig::from_toml(
            r#"
            [pool]
            max_contexts = 3

            [net]
            proxy = "socks5://user:pw@127.0.0.1:1080"
            tls = "verify"
            dns_servers = ["9.9.9.9:53"]

            [fs]
            root = "/srv/scripts"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_contexts, 3);
        assert_eq!(config.pool.hook_interval, PoolConfig::default().hook_interval);
        assert_eq!(config.net.proxy.as_deref(), Some("socks5://user:pw@127.0.0.1:1080"));
        assert_eq!(config.net.transport().tls_policy, TlsPolicy::Verify);
        assert_eq!(config.net.resolver().servers, vec!["9.9.9.9:53"]);
        assert_eq!(config.fs.root, PathBuf::from("/srv/scripts"));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WardenConfig::from_toml("[pool]\nmax_contexts = 0"),
            Err(WardenError::Config(_))
        ));
        assert!(matches!(
            WardenConfig::from_toml("pool = 3"),
            Err(WardenError::Config(_))
        ));
        assert!(matches!(
            WardenConfig::load("/no/such/warden.toml"),
            Err(WardenError::ConfigRead { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = WardenConfig::new()
            .with_pool(PoolConfig::minimal())
            .with_proxy("http://127.0.0.1:8080")
            .with_root("/tmp");
        let text = config.to_toml().unwrap();
        assert_eq!(WardenConfig::from_toml(&text).unwrap(), config);
    }
}
