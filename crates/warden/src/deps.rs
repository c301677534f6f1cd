//! The dependency set handed to catalog factories.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use warden_capability::builtin::StoreModule;
use warden_fs::{RelativeFileSystem, SharedFileSystem};
use warden_net::http::HttpClient;
use warden_net::{DirectDriver, ProxyDriver, Resolver, SharedDriver};

use crate::config::{NetConfig, WardenConfig};
use crate::error::WardenResult;

/// Objects shared by every context of one host.
///
/// Built once; each network module captures the same driver, each
/// filesystem module the same confined filesystem.
#[derive(Debug, Clone)]
pub struct HostDependencies {
    /// Driver behind `net.*`.
    pub driver: SharedDriver,
    /// Filesystem behind `fs` and `fs.utils`.
    pub filesystem: SharedFileSystem,
    /// Client behind `net.http`.
    pub http: HttpClient,
    /// Resolver behind `net.dns`.
    pub resolver: Resolver,
    /// Backing map of `store`.
    pub store: StoreModule,
    /// Default dial timeout of `net.tcp` and `net.udp`.
    pub dial_timeout: Duration,
}

impl HostDependencies {
    /// Assemble dependencies around an existing driver and filesystem.
    pub fn new(
        driver: SharedDriver,
        filesystem: SharedFileSystem,
        net: &NetConfig,
    ) -> WardenResult<Self> {
        let http = HttpClient::new(Arc::clone(&driver), net.transport())?;
        let resolver = Resolver::new(Arc::clone(&driver), net.resolver());
        Ok(Self {
            driver,
            filesystem,
            http,
            resolver,
            store: StoreModule::new(),
            dial_timeout: net.dial_timeout(),
        })
    }

    /// Build the driver and filesystem a configuration describes.
    ///
    /// The driver is direct, or a proxy driver over a direct one when
    /// `net.proxy` is set. The filesystem is confined to `fs.root`.
    pub fn from_config(config: &WardenConfig) -> WardenResult<Self> {
        let driver = build_driver(&config.net)?;
        let filesystem: SharedFileSystem = Arc::new(RelativeFileSystem::native(&config.fs.root)?);
        Self::new(driver, filesystem, &config.net)
    }
}

/// Build the driver for `net`: direct, or proxied over direct.
pub fn build_driver(net: &NetConfig) -> WardenResult<SharedDriver> {
    let direct: SharedDriver = Arc::new(DirectDriver::new()?);
    match &net.proxy {
        Some(url) => {
            let proxy = ProxyDriver::new(url, direct)?;
            info!(endpoint = proxy.endpoint(), protocol = ?proxy.protocol(), "Routing script traffic through proxy");
            Ok(Arc::new(proxy))
        }
        None => Ok(direct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_driver() {
        let direct = build_driver(&NetConfig::default()).unwrap();
        assert_eq!(direct.name(), "direct");

        let net = NetConfig {
            proxy: Some("http://127.0.0.1:3128".into()),
            ..NetConfig::default()
        };
        assert_eq!(build_driver(&net).unwrap().name(), "proxy");

        let bad = NetConfig {
            proxy: Some("ftp://127.0.0.1:21".into()),
            ..NetConfig::default()
        };
        assert!(build_driver(&bad).is_err());
    }

    #[test]
    fn test_from_config_requires_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::new().with_root(dir.path());
        let deps = HostDependencies::from_config(&config).unwrap();
        assert_eq!(deps.dial_timeout, Duration::from_secs(30));

        let missing = WardenConfig::new().with_root(dir.path().join("missing"));
        assert!(HostDependencies::from_config(&missing).is_err());
    }
}
