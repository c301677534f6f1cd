//! Core capability module trait and namespace type.
//!
//! A capability module is a host-side object that, once registered in a
//! catalog, becomes reachable from guest code under a fixed dotted namespace
//! (for example `net.tcp`). Modules are shared across every interpreter of a
//! pool, so they must be `Send + Sync` and must not keep per-interpreter state.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use mlua::{Lua, Table};
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// Dotted identifier under which a module is exposed to guest scripts.
///
/// # Example
///
/// ```
/// use warden_capability::Namespace;
///
/// let ns = Namespace::parse("net.http").unwrap();
/// assert_eq!(ns.as_str(), "net.http");
/// assert!(Namespace::parse("Net..http").is_err());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    /// Create a namespace after validating its shape.
    ///
    /// Namespaces are non-empty, dot-separated segments of lowercase ASCII
    /// letters, digits and underscores.
    pub fn parse(namespace: impl Into<Cow<'static, str>>) -> CapabilityResult<Self> {
        let namespace = namespace.into();
        validate(&namespace).map_err(|reason| CapabilityError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason,
        })?;
        Ok(Self(namespace))
    }

    /// Get the namespace as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(namespace: &str) -> Result<(), &'static str> {
    if namespace.is_empty() {
        return Err("namespace is empty");
    }
    for segment in namespace.split('.') {
        if segment.is_empty() {
            return Err("empty segment");
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err("segments may only contain [a-z0-9_]");
        }
    }
    Ok(())
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Namespace {}

impl Hash for Namespace {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host object that can be bound into a guest interpreter.
///
/// `install` is called once per execution context, when the context is
/// created. The returned table is what `require(namespace)` yields inside the
/// guest. Implementations capture shared dependencies (drivers, filesystems,
/// stores) by `Arc` so every context sees the same objects.
///
/// # Implementing a module
///
/// ```ignore
/// use mlua::{Lua, Table};
/// use warden_capability::CapabilityModule;
///
/// #[derive(Debug)]
/// struct Greeter;
///
/// impl CapabilityModule for Greeter {
///     fn name(&self) -> &str {
///         "Greeter"
///     }
///
///     fn install(&self, lua: &Lua) -> mlua::Result<Table> {
///         let module = lua.create_table()?;
///         module.set("hello", lua.create_function(|_, who: String| Ok(format!("hello {who}")))?)?;
///         Ok(module)
///     }
/// }
/// ```
pub trait CapabilityModule: Send + Sync + fmt::Debug {
    /// Human-readable module name.
    fn name(&self) -> &str;

    /// Build the guest-visible table for one interpreter.
    fn install(&self, lua: &Lua) -> mlua::Result<Table>;
}

/// A shared capability module reference.
pub type SharedModule = Arc<dyn CapabilityModule>;

/// The namespaces of the standard host catalog.
pub mod namespaces {
    use super::Namespace;
    use std::borrow::Cow;

    macro_rules! namespace {
        ($($(#[$doc:meta])* $ident:ident = $value:literal;)*) => {
            $(
                $(#[$doc])*
                pub const $ident: Namespace = Namespace(Cow::Borrowed($value));
            )*

            /// Every standard namespace, in catalog order.
            pub const ALL: &[Namespace] = &[$($ident),*];
        };
    }

    namespace! {
        /// Stream sockets.
        NET_TCP = "net.tcp";
        /// Datagram sockets.
        NET_UDP = "net.udp";
        /// HTTP client.
        NET_HTTP = "net.http";
        /// Name resolution.
        NET_DNS = "net.dns";
        /// URL parsing and query encoding.
        NET_URL = "net.url";
        /// Byte buffers.
        BUFFER = "buffer";
        /// Clocks and sleeping.
        TIME = "time";
        /// Bitwise helpers.
        BIT = "bit";
        /// Confined filesystem.
        FS = "fs";
        /// Whole-file helpers over the confined filesystem.
        FS_UTILS = "fs.utils";
        /// In-memory readers.
        IO_READER = "io.reader";
        /// In-memory writers.
        IO_WRITER = "io.writer";
        /// Random numbers.
        RAND = "rand";
        /// MD5 digests.
        CRYPTO_MD5 = "crypto.md5";
        /// SHA-1 digests.
        CRYPTO_SHA1 = "crypto.sha1";
        /// SHA-256 digests.
        CRYPTO_SHA256 = "crypto.sha256";
        /// SHA-512 digests.
        CRYPTO_SHA512 = "crypto.sha512";
        /// Keyed-hash message authentication.
        CRYPTO_HMAC = "crypto.hmac";
        /// CRC-32 checksums.
        HASH_CRC32 = "hash.crc32";
        /// CRC-64 checksums.
        HASH_CRC64 = "hash.crc64";
        /// Regular expressions.
        REGEXP = "regexp";
        /// Process-wide key/value store.
        STORE = "store";
    }
}
