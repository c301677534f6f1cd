//! Dialing through the local network stack.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace};

use super::{Conn, DatagramConn, NetDriver, Network, split_host_port};
use crate::context::{ContextError, DialContext};
use crate::error::{NetError, NetResult};

/// Connects directly to the destination.
///
/// Connect attempts run on a small private runtime so they can be raced
/// against the context's deadline and cancellation token. The returned
/// connections are plain blocking sockets.
#[derive(Debug)]
pub struct DirectDriver {
    runtime: Runtime,
}

impl DirectDriver {
    /// Create a driver with its own dial runtime.
    ///
    /// # Errors
    ///
    /// Fails when the runtime's worker thread cannot be spawned.
    pub fn new() -> NetResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("warden-dial")
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self { runtime })
    }
}

pub(crate) fn context_error(err: ContextError, address: &str) -> NetError {
    let address = address.to_owned();
    match err {
        ContextError::Canceled => NetError::DialCanceled { address },
        ContextError::DeadlineExceeded => NetError::DialTimeout { address },
    }
}

async fn connect(network: Network, address: &str) -> io::Result<Conn> {
    match network {
        Network::Tcp => {
            let stream = tokio::net::TcpStream::connect(address).await?;
            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            Ok(Box::new(stream))
        }
        Network::Udp => {
            let remote = tokio::net::lookup_host(address)
                .await?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))?;
            let local: SocketAddr = if remote.is_ipv4() {
                ([0u8; 4], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(local)?;
            socket.connect(remote)?;
            Ok(Box::new(DatagramConn::new(socket)))
        }
    }
}

enum Outcome {
    Connected(io::Result<Conn>),
    Stopped(ContextError),
}

impl NetDriver for DirectDriver {
    fn name(&self) -> &str {
        "direct"
    }

    fn dial(&self, ctx: &DialContext, network: Network, address: &str) -> NetResult<Conn> {
        split_host_port(address)?;
        if let Some(err) = ctx.err() {
            return Err(context_error(err, address));
        }

        let started = Instant::now();
        trace!(%network, address, "Dialing");

        let outcome = self.runtime.block_on(async {
            tokio::select! {
                res = connect(network, address) => Outcome::Connected(res),
                err = ctx.done() => Outcome::Stopped(err),
            }
        });

        match outcome {
            Outcome::Connected(Ok(conn)) => {
                debug!(
                    %network,
                    address,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Connected"
                );
                Ok(conn)
            }
            Outcome::Connected(Err(source)) => Err(NetError::Connect {
                address: address.to_owned(),
                source,
            }),
            Outcome::Stopped(err) => Err(context_error(err, address)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn test_dial_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"hi").unwrap();
        });

        let driver = DirectDriver::new().unwrap();
        let ctx = DialContext::with_timeout(Duration::from_secs(5));
        let mut conn = driver.dial(&ctx, Network::Tcp, &address).unwrap();
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        server.join().unwrap();
    }

    #[test]
    fn test_cancelled_context_fails_fast() {
        let driver = DirectDriver::new().unwrap();
        let ctx = DialContext::background();
        ctx.cancel_token().cancel();
        let err = driver.dial(&ctx, Network::Tcp, "127.0.0.1:9").unwrap_err();
        assert!(matches!(err, NetError::DialCanceled { .. }));
    }

    #[test]
    fn test_expired_context_times_out() {
        let driver = DirectDriver::new().unwrap();
        let ctx = DialContext::with_deadline(Instant::now());
        let err = driver.dial(&ctx, Network::Tcp, "127.0.0.1:9").unwrap_err();
        assert!(matches!(err, NetError::DialTimeout { .. }));
    }

    #[test]
    fn test_refused_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let driver = DirectDriver::new().unwrap();
        let ctx = DialContext::with_timeout(Duration::from_secs(5));
        let err = driver.dial(&ctx, Network::Tcp, &address).unwrap_err();
        assert!(matches!(err, NetError::Connect { .. }));
    }

    #[test]
    fn test_udp_dial() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = peer.local_addr().unwrap().to_string();

        let driver = DirectDriver::new().unwrap();
        let mut conn = driver
            .dial(&DialContext::background(), Network::Udp, &address)
            .unwrap();
        conn.write_all(b"ping").unwrap();

        let mut buf = [0u8; 8];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_rejects_address_without_port() {
        let driver = DirectDriver::new().unwrap();
        let err = driver
            .dial(&DialContext::background(), Network::Tcp, "localhost")
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidAddress(_)));
    }
}
