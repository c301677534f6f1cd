//! The standard 22-namespace catalog.

use std::sync::Arc;

use warden_capability::builtin::{
    BitModule, BufferModule, CrcModule, CrcWidth, HashAlgorithm, HashModule, HmacModule,
    ReaderModule, RandModule, RegexpModule, TimeModule, WriterModule,
};
use warden_capability::namespaces::*;
use warden_capability::{Catalog, CatalogBuilder, CapabilityResult, Namespace};
use warden_fs::{FsModule, FsUtilsModule};
use warden_net::modules::{DnsModule, HttpModule, SocketModule, UrlModule};

use crate::deps::HostDependencies;

fn ns(namespace: Namespace) -> String {
    namespace.as_str().to_owned()
}

/// Builder pre-populated with every standard binding.
///
/// Hosts can append their own modules before building; a namespace bound
/// twice fails the build.
pub fn standard_builder() -> CatalogBuilder<HostDependencies> {
    CatalogBuilder::new()
        .factory(ns(NET_TCP), |deps: &HostDependencies| {
            Ok(SocketModule::tcp(Arc::clone(&deps.driver)).with_dial_timeout(deps.dial_timeout))
        })
        .factory(ns(NET_UDP), |deps: &HostDependencies| {
            Ok(SocketModule::udp(Arc::clone(&deps.driver)).with_dial_timeout(deps.dial_timeout))
        })
        .factory(ns(NET_HTTP), |deps: &HostDependencies| {
            Ok(HttpModule::new(deps.http.clone()))
        })
        .factory(ns(NET_DNS), |deps: &HostDependencies| {
            Ok(DnsModule::new(deps.resolver.clone()))
        })
        .module(ns(NET_URL), UrlModule::new())
        .module(ns(BUFFER), BufferModule::new())
        .module(ns(TIME), TimeModule::new())
        .module(ns(BIT), BitModule::new())
        .factory(ns(FS), |deps: &HostDependencies| {
            Ok(FsModule::new(Arc::clone(&deps.filesystem)))
        })
        .factory(ns(FS_UTILS), |deps: &HostDependencies| {
            Ok(FsUtilsModule::new(Arc::clone(&deps.filesystem)))
        })
        .module(ns(IO_READER), ReaderModule::new())
        .module(ns(IO_WRITER), WriterModule::new())
        .module(ns(RAND), RandModule::new())
        .module(ns(CRYPTO_MD5), HashModule::new(HashAlgorithm::Md5))
        .module(ns(CRYPTO_SHA1), HashModule::new(HashAlgorithm::Sha1))
        .module(ns(CRYPTO_SHA256), HashModule::new(HashAlgorithm::Sha256))
        .module(ns(CRYPTO_SHA512), HashModule::new(HashAlgorithm::Sha512))
        .module(ns(CRYPTO_HMAC), HmacModule::new())
        .module(ns(HASH_CRC32), CrcModule::new(CrcWidth::Crc32))
        .module(ns(HASH_CRC64), CrcModule::new(CrcWidth::Crc64))
        .module(ns(REGEXP), RegexpModule::new())
        .factory(ns(STORE), |deps: &HostDependencies| Ok(deps.store.clone()))
}

/// Resolve the standard catalog against `deps`.
pub fn standard_catalog(deps: &HostDependencies) -> CapabilityResult<Catalog> {
    standard_builder().build(deps)
}

#[cfg(test)]
mod tests {
    use warden_fs::{RelativeFileSystem, SharedFileSystem};
    use warden_net::{DirectDriver, SharedDriver};

    use super::*;
    use crate::config::NetConfig;

    #[test]
    fn test_standard_catalog_binds_every_namespace_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver: SharedDriver = Arc::new(DirectDriver::new().unwrap());
        let fs: SharedFileSystem = Arc::new(RelativeFileSystem::native(dir.path()).unwrap());
        let deps = HostDependencies::new(driver, fs, &NetConfig::default()).unwrap();

        let catalog = standard_catalog(&deps).unwrap();
        assert_eq!(catalog.len(), 22);
        assert_eq!(catalog.namespaces(), ALL.to_vec());
        assert_eq!(catalog.get("net.tcp").unwrap().name(), "TCP");
        assert_eq!(catalog.get("crypto.sha256").unwrap().name(), "SHA-256");
    }

    #[test]
    fn test_duplicate_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let driver: SharedDriver = Arc::new(DirectDriver::new().unwrap());
        let fs: SharedFileSystem = Arc::new(RelativeFileSystem::native(dir.path()).unwrap());
        let deps = HostDependencies::new(driver, fs, &NetConfig::default()).unwrap();

        let result = standard_builder().module("bit", BitModule::new()).build(&deps);
        assert!(result.is_err());
    }
}
