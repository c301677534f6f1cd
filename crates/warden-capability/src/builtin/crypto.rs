//! `crypto.*` modules: message digests and HMAC.

use hmac::{Hmac, Mac};
use md5::Md5;
use mlua::{ExternalResult, Lua, Table};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::capability::CapabilityModule;

/// Digest algorithms available to guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl HashAlgorithm {
    /// Parse an algorithm name as used by `crypto.hmac`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Compute an HMAC of `data` under `key`.
    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
        macro_rules! mac {
            ($digest:ty) => {{
                let mut mac = Hmac::<$digest>::new_from_slice(key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }};
        }

        Ok(match self {
            Self::Md5 => mac!(Md5),
            Self::Sha1 => mac!(Sha1),
            Self::Sha256 => mac!(Sha256),
            Self::Sha512 => mac!(Sha512),
        })
    }
}

/// Provides `sum(data)` and `hex(data)` for one digest algorithm.
#[derive(Debug)]
pub struct HashModule {
    algorithm: HashAlgorithm,
}

impl HashModule {
    /// Create a module for `algorithm`.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl CapabilityModule for HashModule {
    fn name(&self) -> &str {
        match self.algorithm {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        let algorithm = self.algorithm;
        module.set(
            "sum",
            lua.create_function(move |lua, data: mlua::String| {
                lua.create_string(algorithm.digest(&data.as_bytes()))
            })?,
        )?;
        module.set(
            "hex",
            lua.create_function(move |_, data: mlua::String| {
                Ok(hex::encode(algorithm.digest(&data.as_bytes())))
            })?,
        )?;
        Ok(module)
    }
}

/// Provides `crypto.hmac.sum(alg, key, data)` and `crypto.hmac.hex(...)`.
#[derive(Debug, Default)]
pub struct HmacModule;

impl HmacModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

fn hmac_args(alg: &str, key: &mlua::String, data: &mlua::String) -> mlua::Result<Vec<u8>> {
    let algorithm = HashAlgorithm::from_name(alg)
        .ok_or_else(|| mlua::Error::runtime(format!("unknown hmac algorithm: {alg}")))?;
    algorithm.hmac(&key.as_bytes(), &data.as_bytes()).into_lua_err()
}

impl CapabilityModule for HmacModule {
    fn name(&self) -> &str {
        "HMAC"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "sum",
            lua.create_function(
                |lua, (alg, key, data): (String, mlua::String, mlua::String)| {
                    lua.create_string(hmac_args(&alg, &key, &data)?)
                },
            )?,
        )?;
        module.set(
            "hex",
            lua.create_function(
                |_, (alg, key, data): (String, mlua::String, mlua::String)| {
                    Ok(hex::encode(hmac_args(&alg, &key, &data)?))
                },
            )?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(HashAlgorithm::Md5.digest(b"abc")),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex::encode(HashAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex::encode(HashAlgorithm::Sha256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_sha256() {
        // RFC 4231 test case 2
        let mac = HashAlgorithm::Sha256
            .hmac(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hash_module_from_lua() {
        let lua = Lua::new();
        lua.globals()
            .set("sha1", HashModule::new(HashAlgorithm::Sha1).install(&lua).unwrap())
            .unwrap();
        lua.globals()
            .set("hmac", HmacModule::new().install(&lua).unwrap())
            .unwrap();

        let (digest, raw_len): (String, usize) = lua
            .load(r#"return sha1.hex("abc"), #hmac.sum("sha512", "k", "v")"#)
            .eval()
            .unwrap();
        assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(raw_len, 64);
        assert!(lua.load(r#"hmac.hex("crc", "k", "v")"#).exec().is_err());
    }
}
