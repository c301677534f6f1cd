//! `net.tcp` and `net.udp` modules.

use std::io::{self, Read, Write};
use std::time::Duration;

use mlua::{ExternalResult, Lua, Table, UserData, UserDataMethods, Value};
use parking_lot::Mutex;
use tracing::debug;
use warden_capability::CapabilityModule;

use super::seconds;
use crate::context::DialContext;
use crate::driver::{Conn, Network, SharedDriver};

const DEFAULT_READ_SIZE: usize = 4096;
const MAX_READ_SIZE: usize = 16 * 1024 * 1024;

/// A dialed connection handed to guest code.
///
/// Closing drops the underlying connection; later calls fail with
/// "connection closed".
#[derive(Debug)]
pub struct LuaConn {
    conn: Mutex<Option<Conn>>,
    network: Network,
    address: String,
}

impl LuaConn {
    /// Wrap a dialed connection.
    pub fn new(conn: Conn, network: Network, address: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            network,
            address: address.into(),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Conn) -> io::Result<T>) -> mlua::Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| mlua::Error::runtime("connection closed"))?;
        f(conn).into_lua_err()
    }

    fn close(&self) -> bool {
        match self.conn.lock().take() {
            Some(conn) => {
                let _ = conn.shutdown();
                debug!(network = %self.network, address = %self.address, "Guest closed connection");
                true
            }
            None => false,
        }
    }
}

impl UserData for LuaConn {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("read", |lua, this, n: Option<usize>| {
            let n = n.unwrap_or(DEFAULT_READ_SIZE).clamp(1, MAX_READ_SIZE);
            let mut buf = vec![0u8; n];
            let read = this.with_conn(|conn| conn.read(&mut buf))?;
            if read == 0 {
                return Ok(Value::Nil);
            }
            lua.create_string(&buf[..read]).map(Value::String)
        });
        methods.add_method("write", |_, this, data: mlua::String| {
            let bytes = data.as_bytes();
            this.with_conn(|conn| conn.write_all(&bytes).and_then(|()| conn.flush()))?;
            Ok(bytes.len())
        });
        methods.add_method("close", |_, this, ()| Ok(this.close()));
        methods.add_method("local_addr", |_, this, ()| {
            this.with_conn(|conn| conn.local_addr().map(|a| a.to_string()))
        });
        methods.add_method("remote_addr", |_, this, ()| {
            this.with_conn(|conn| conn.peer_addr().map(|a| a.to_string()))
        });
        methods.add_method("set_timeout", |_, this, secs: Option<f64>| {
            let timeout = seconds(secs)?;
            this.with_conn(|conn| {
                conn.set_read_timeout(timeout)?;
                conn.set_write_timeout(timeout)
            })
        });
    }
}

impl Drop for LuaConn {
    fn drop(&mut self) {
        self.close();
    }
}

/// Provides `dial(address[, timeout])` for one network.
#[derive(Debug)]
pub struct SocketModule {
    driver: SharedDriver,
    network: Network,
    dial_timeout: Duration,
}

impl SocketModule {
    /// `net.tcp`.
    pub fn tcp(driver: SharedDriver) -> Self {
        Self::new(driver, Network::Tcp)
    }

    /// `net.udp`.
    pub fn udp(driver: SharedDriver) -> Self {
        Self::new(driver, Network::Udp)
    }

    fn new(driver: SharedDriver, network: Network) -> Self {
        Self {
            driver,
            network,
            dial_timeout: Duration::from_secs(30),
        }
    }

    /// Timeout applied when the guest passes none.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }
}

impl CapabilityModule for SocketModule {
    fn name(&self) -> &str {
        match self.network {
            Network::Tcp => "TCP",
            Network::Udp => "UDP",
        }
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        let driver = self.driver.clone();
        let network = self.network;
        let default_timeout = self.dial_timeout;
        module.set(
            "dial",
            lua.create_function(move |_, (address, timeout): (String, Option<f64>)| {
                let timeout = seconds(timeout)?.unwrap_or(default_timeout);
                let ctx = DialContext::with_timeout(timeout);
                let conn = driver.dial(&ctx, network, &address).into_lua_err()?;
                debug!(network = %network, address = %address, driver = driver.name(), "Guest dialed");
                Ok(LuaConn::new(conn, network, address))
            })?,
        )?;
        Ok(module)
    }
}
