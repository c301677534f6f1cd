//! The dialing abstraction shared by every network capability.
//!
//! Modules never touch the OS network stack themselves; they hold a
//! [`SharedDriver`] picked once when the catalog is built. Swapping a
//! [`DirectDriver`] for a [`ProxyDriver`] reroutes every module at once.

mod direct;
mod proxy;

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use direct::DirectDriver;
pub use proxy::{ProxyDriver, ProxyProtocol};

use crate::context::DialContext;
use crate::error::{NetError, NetResult};

/// Transport family of a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Stream sockets.
    Tcp,
    /// Datagram sockets.
    Udp,
}

impl Network {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "tcp4" | "tcp6" => Ok(Self::Tcp),
            "udp" | "udp4" | "udp6" => Ok(Self::Udp),
            other => Err(NetError::UnknownNetwork(other.to_owned())),
        }
    }
}

/// A bidirectional byte stream returned by a driver.
pub trait Connection: Read + Write + Send + fmt::Debug {
    /// Bound blocking reads. `None` blocks forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bound blocking writes. `None` blocks forever.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Local socket address.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote socket address (the proxy, when tunnelled).
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Shut down both directions.
    fn shutdown(&self) -> io::Result<()>;

    /// A second handle to the same connection, so one thread can read while
    /// another writes. HTTP needs this; connections that cannot be split
    /// report `Unsupported`.
    fn try_clone(&self) -> io::Result<Conn> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "connection cannot be split",
        ))
    }
}

/// An owned connection.
pub type Conn = Box<dyn Connection>;

/// Establishes connections on behalf of network modules.
pub trait NetDriver: Send + Sync + fmt::Debug {
    /// Driver name for logs and errors.
    fn name(&self) -> &str;

    /// Connect to `address` (`host:port`) over `network`.
    ///
    /// # Errors
    ///
    /// `DialTimeout` / `DialCanceled` when the context ends first,
    /// `ProxyNegotiationFailed` when a tunnel cannot be set up, `Connect`
    /// for refused or unreachable destinations.
    fn dial(&self, ctx: &DialContext, network: Network, address: &str) -> NetResult<Conn>;
}

/// A shared driver reference.
pub type SharedDriver = Arc<dyn NetDriver>;

impl Connection for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn try_clone(&self) -> io::Result<Conn> {
        TcpStream::try_clone(self).map(|stream| Box::new(stream) as Conn)
    }
}

/// A connected datagram socket. Each `read` receives one datagram, each
/// `write` sends one.
#[derive(Debug)]
pub struct DatagramConn {
    socket: UdpSocket,
}

impl DatagramConn {
    /// Wrap an already connected socket.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Read for DatagramConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Write for DatagramConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for DatagramConn {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_write_timeout(timeout)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Conn> {
        let socket = self.socket.try_clone()?;
        Ok(Box::new(Self { socket }))
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(address: &str) -> NetResult<(String, u16)> {
    let invalid = || NetError::InvalidAddress(address.to_owned());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_owned(), port))
}

/// Join a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Bound both directions of `conn` by the time left in `ctx`.
pub(crate) fn apply_deadline(conn: &dyn Connection, ctx: &DialContext) -> io::Result<()> {
    let timeout = match ctx.remaining() {
        Some(left) if left.is_zero() => {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
        }
        other => other,
    };
    conn.set_read_timeout(timeout)?;
    conn.set_write_timeout(timeout)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connection and recording driver.

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// A connection replaying canned input and capturing output.
    #[derive(Debug, Clone, Default)]
    pub struct MockConnection {
        pub input: Arc<Mutex<VecDeque<u8>>>,
        pub output: Arc<Mutex<Vec<u8>>>,
        pub shut_down: Arc<Mutex<bool>>,
    }

    impl MockConnection {
        pub fn with_input(input: &[u8]) -> Self {
            let conn = Self::default();
            conn.input.lock().extend(input.iter().copied());
            conn
        }

        pub fn written(&self) -> Vec<u8> {
            self.output.lock().clone()
        }

        pub fn is_shut_down(&self) -> bool {
            *self.shut_down.lock()
        }
    }

    impl Read for MockConnection {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut input = self.input.lock();
            let n = buf.len().min(input.len());
            for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for MockConnection {
        fn set_read_timeout(&self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 40000)))
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 8888)))
        }

        fn shutdown(&self) -> io::Result<()> {
            *self.shut_down.lock() = true;
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Conn> {
            Ok(Box::new(self.clone()))
        }
    }

    /// A driver recording every dial and handing out one canned connection.
    #[derive(Debug, Default)]
    pub struct MockDriver {
        pub dials: Mutex<Vec<(Network, String)>>,
        pub conn: MockConnection,
    }

    impl MockDriver {
        pub fn new(conn: MockConnection) -> Self {
            Self {
                dials: Mutex::new(Vec::new()),
                conn,
            }
        }

        pub fn dialed(&self) -> Vec<(Network, String)> {
            self.dials.lock().clone()
        }
    }

    impl NetDriver for MockDriver {
        fn name(&self) -> &str {
            "mock"
        }

        fn dial(&self, _ctx: &DialContext, network: Network, address: &str) -> NetResult<Conn> {
            self.dials.lock().push((network, address.to_owned()));
            Ok(Box::new(self.conn.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("udp6".parse::<Network>().unwrap(), Network::Udp);
        assert!("unix".parse::<Network>().is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(split_host_port("[::1]:53").unwrap(), ("::1".to_string(), 53));
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port("::1:53").is_err());
        assert!(split_host_port("host:99999").is_err());
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("::1", 53), "[::1]:53");
        assert_eq!(join_host_port("a.b", 80), "a.b:80");
    }
}
