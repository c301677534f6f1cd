//! The assembled host: dependencies, catalog and pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use warden_capability::{Catalog, Namespace};
use warden_core::{ExecutionPool, PoolConfig, PoolStats, RunOutcome};
use warden_fs::{RelativeFileSystem, SharedFileSystem};
use warden_net::SharedDriver;

use crate::catalog::standard_catalog;
use crate::config::WardenConfig;
use crate::deps::{HostDependencies, build_driver};
use crate::error::WardenResult;

/// Main entry point for Warden.
pub struct Warden;

impl Warden {
    /// Create a host builder.
    pub fn builder() -> WardenBuilder {
        WardenBuilder::new()
    }

    /// Build a host from a configuration.
    pub fn from_config(config: WardenConfig) -> WardenResult<WardenHost> {
        WardenBuilder::new().with_config(config).build()
    }
}

/// Builder for [`WardenHost`].
#[derive(Debug, Default)]
pub struct WardenBuilder {
    config: WardenConfig,
    driver: Option<SharedDriver>,
    filesystem: Option<SharedFileSystem>,
    extensions: Vec<Catalog>,
}

impl WardenBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: WardenConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pool configuration.
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Route script traffic through a proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.net.proxy = Some(proxy.into());
        self
    }

    /// Confine scripts to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.fs.root = root.into();
        self
    }

    /// Use a prebuilt driver instead of the configured one.
    pub fn with_driver(mut self, driver: SharedDriver) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Use a prebuilt filesystem instead of confining `fs.root`.
    pub fn with_filesystem(mut self, filesystem: SharedFileSystem) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Bind extra modules on top of the standard catalog.
    ///
    /// Extensions are merged in order; an extension namespace replaces a
    /// standard binding of the same name.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.extensions.push(catalog);
        self
    }

    /// Build the host.
    pub fn build(self) -> WardenResult<WardenHost> {
        self.config.validate()?;

        let driver = match self.driver {
            Some(driver) => driver,
            None => build_driver(&self.config.net)?,
        };
        let filesystem: SharedFileSystem = match self.filesystem {
            Some(fs) => fs,
            None => Arc::new(RelativeFileSystem::native(&self.config.fs.root)?),
        };
        let deps = HostDependencies::new(driver, filesystem, &self.config.net)?;

        let mut pool = ExecutionPool::builder()
            .with_config(self.config.pool.clone())
            .preload(standard_catalog(&deps)?);
        for extension in self.extensions {
            pool = pool.preload(extension);
        }
        let pool = pool.build()?;

        info!(
            driver = deps.driver.name(),
            modules = pool.catalog().len(),
            max_contexts = self.config.pool.max_contexts,
            "Warden host ready"
        );
        Ok(WardenHost {
            config: self.config,
            deps,
            pool,
        })
    }
}

/// A configured host.
#[derive(Debug, Clone)]
pub struct WardenHost {
    config: WardenConfig,
    deps: HostDependencies,
    pool: ExecutionPool,
}

impl WardenHost {
    /// The configuration the host was built from.
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Shared dependencies.
    pub fn dependencies(&self) -> &HostDependencies {
        &self.deps
    }

    /// The execution pool.
    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Bound namespaces, in catalog order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.pool.catalog().namespaces()
    }

    /// Run a script file.
    pub fn do_file(&self, path: impl AsRef<Path>) -> WardenResult<RunOutcome> {
        Ok(self.pool.do_file(path)?)
    }

    /// Run inline source.
    pub fn do_string(&self, source: &str) -> WardenResult<RunOutcome> {
        Ok(self.pool.do_string(source)?)
    }

    /// Pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use warden_capability::CatalogBuilder;
    use warden_capability::builtin::TimeModule;
    use warden_core::CoreError;

    use super::*;
    use crate::error::WardenError;

    fn host(root: &Path) -> WardenHost {
        Warden::builder()
            .with_root(root)
            .with_pool_config(PoolConfig::new().with_max_contexts(2))
            .build()
            .unwrap()
    }

    fn run(host: &WardenHost, source: &str) -> Vec<String> {
        host.do_string(source).unwrap().values
    }

    #[test]
    fn test_leaf_modules() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let values = run(
            &host,
            r#"
            local b = require("buffer").new("ab")
            b:append("c")
            local r = require("io.reader").new("x\ny")
            return require("crypto.sha1").hex("abc"),
                require("hash.crc32").checksum("123456789"),
                require("crypto.hmac").hex("sha256", "Jefe", "what do ya want for nothing?"),
                b:hex(),
                require("bit").lshift(1, 8),
                r:read_line(),
                require("regexp").compile("(\\d+)"):find("ab12"),
                #require("rand").hex(4)
            "#,
        );
        assert_eq!(
            values,
            vec![
                "a9993e364706816aba3e25717850c26c9cd0d89d",
                "3421780262",
                "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843",
                "616263",
                "256",
                "x",
                "12",
                "8",
            ]
        );
    }

    #[test]
    fn test_filesystem_is_confined_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());

        run(
            &host,
            r#"
            local utils = require("fs.utils")
            require("fs").mkdir("data")
            utils.write_file("data/a.txt", "hello")
            utils.append_file("data/a.txt", " world")
            "#,
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data/a.txt")).unwrap(),
            "hello world"
        );

        let err = host
            .do_string(r#"return require("fs.utils").read_file("../../etc/passwd")"#)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid path"), "{err}");
        assert!(!err.to_string().contains(&*dir.path().to_string_lossy()));
    }

    #[test]
    fn test_unbound_namespaces_and_removed_globals() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let values = run(
            &host,
            r#"
            local ok, err = pcall(require, "os")
            return ok, string.find(tostring(err), "module 'os' not found", 1, true) ~= nil,
                io == nil, dofile == nil, package == nil
            "#,
        );
        assert_eq!(values, vec!["false", "true", "true", "true", "true"]);
    }

    #[test]
    fn test_store_is_shared_across_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());

        let held = host.pool().acquire().unwrap();
        run(&host, r#"require("store").set("seen", "yes")"#);
        drop(held);

        assert_eq!(host.dependencies().store.get("seen"), Some("yes".into()));
        assert_eq!(run(&host, r#"return require("store").get("seen")"#), vec!["yes"]);
    }

    #[test]
    fn test_tcp_dial_through_host_driver() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            buf.reverse();
            stream.write_all(&buf).unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let values = run(
            &host,
            &format!(
                r#"
                local conn = require("net.tcp").dial("{address}", 5)
                conn:write("abcd")
                local reply = conn:read(4)
                conn:close()
                return reply
                "#
            ),
        );
        assert_eq!(values, vec!["dcba"]);
    }

    #[test]
    fn test_script_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let err = host.do_string("error('nope')").unwrap_err();
        assert!(matches!(
            err,
            WardenError::Core(CoreError::ScriptRuntimeError { .. })
        ));
        assert!(err.to_string().contains("nope"));
        assert_eq!(host.stats().in_use, 0);
    }

    #[test]
    fn test_extension_catalog_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let extra = CatalogBuilder::<()>::new()
            .module("clock", TimeModule::new())
            .build(&())
            .unwrap();
        let host = Warden::builder()
            .with_root(dir.path())
            .with_catalog(extra)
            .build()
            .unwrap();

        assert_eq!(host.namespaces().len(), 23);
        assert_eq!(
            run(&host, r#"return type(require("clock").millis())"#),
            vec!["number"]
        );
    }

    #[test]
    fn test_do_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.lua");
        std::fs::write(&script, r#"return require("net.url").escape("a b")"#).unwrap();
        let host = host(dir.path());
        assert_eq!(host.do_file(&script).unwrap().values, vec!["a+b"]);
    }
}
