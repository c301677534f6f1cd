//! Name resolution over the driver.
//!
//! Queries go to the configured servers through the same [`NetDriver`] as
//! every other module, so a proxy driver also carries DNS. UDP is tried
//! first; when the driver cannot carry datagrams, or the answer is
//! truncated, the query is repeated over TCP.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tracing::{debug, trace};

use crate::context::DialContext;
use crate::driver::{Conn, Network, SharedDriver, apply_deadline};
use crate::error::{NetError, NetResult};

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;
const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const RCODE_NXDOMAIN: u16 = 3;

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Servers as `host:port`, tried in order.
    pub servers: Vec<String>,
    /// Bound on one query exchange.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            servers: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            timeout: Duration::from_secs(5),
        }
    }
}

impl ResolverConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the server list.
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

enum Answer {
    Addresses(Vec<IpAddr>),
    NotFound,
}

/// Stub resolver over a driver.
#[derive(Debug, Clone)]
pub struct Resolver {
    driver: SharedDriver,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver.
    pub fn new(driver: SharedDriver, config: ResolverConfig) -> Self {
        Self { driver, config }
    }

    /// Resolve `name` to its IPv4 and IPv6 addresses.
    pub fn lookup(&self, name: &str) -> NetResult<Vec<IpAddr>> {
        self.lookup_with(&DialContext::background(), name)
    }

    /// Resolve `name` under `ctx`.
    ///
    /// # Errors
    ///
    /// `Dns` for malformed names, unknown names and server failures;
    /// driver errors when no server could be reached.
    pub fn lookup_with(&self, ctx: &DialContext, name: &str) -> NetResult<Vec<IpAddr>> {
        let name = name.trim_end_matches('.');
        if let Ok(ip) = name.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if name.eq_ignore_ascii_case("localhost") {
            return Ok(vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ]);
        }
        validate_name(name)?;

        let mut last_error = NetError::Dns("no DNS servers configured".into());
        for server in &self.config.servers {
            match self.query_server(ctx, server, name) {
                Ok(addresses) => {
                    debug!(name, server = %server, count = addresses.len(), "Resolved");
                    return Ok(addresses);
                }
                Err(e @ NetError::DialCanceled { .. }) | Err(e @ NetError::Canceled) => return Err(e),
                Err(e) => {
                    debug!(name, server = %server, error = %e, "DNS server failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn query_server(&self, ctx: &DialContext, server: &str, name: &str) -> NetResult<Vec<IpAddr>> {
        let mut addresses = Vec::new();
        let mut not_found = 0;
        for qtype in [TYPE_A, TYPE_AAAA] {
            let id: u16 = rand::random();
            let query = build_query(id, name, qtype)?;
            let response = self.exchange(ctx, server, id, &query)?;
            match parse_response(id, &response)? {
                Answer::Addresses(found) => addresses.extend(found),
                Answer::NotFound => not_found += 1,
            }
        }
        if addresses.is_empty() {
            let reason = if not_found > 0 { "name not found" } else { "no addresses" };
            return Err(NetError::Dns(format!("{reason}: {name}")));
        }
        Ok(addresses)
    }

    fn exchange(&self, ctx: &DialContext, server: &str, id: u16, query: &[u8]) -> NetResult<Vec<u8>> {
        let ctx = ctx.child_with_timeout(self.config.timeout);
        match self.driver.dial(&ctx, Network::Udp, server) {
            Ok(conn) => {
                let response = udp_exchange(conn, &ctx, id, query)?;
                if header_flags(&response) & FLAG_TC == 0 {
                    return Ok(response);
                }
                trace!(server, "Truncated UDP answer, retrying over TCP");
            }
            Err(NetError::UnsupportedNetwork { .. }) => {
                trace!(server, "Driver cannot carry UDP, querying over TCP");
            }
            Err(e) => return Err(e),
        }
        let conn = self.driver.dial(&ctx, Network::Tcp, server)?;
        tcp_exchange(conn, &ctx, query)
    }
}

fn map_timeout(e: io::Error) -> NetError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetError::Timeout("DNS response"),
        _ => NetError::Io(e),
    }
}

fn udp_exchange(mut conn: Conn, ctx: &DialContext, id: u16, query: &[u8]) -> NetResult<Vec<u8>> {
    apply_deadline(&*conn, ctx).map_err(map_timeout)?;
    conn.write_all(query).map_err(map_timeout)?;
    let mut buf = vec![0u8; 4096];
    loop {
        let n = conn.read(&mut buf).map_err(map_timeout)?;
        if n >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == id {
            buf.truncate(n);
            return Ok(buf);
        }
        // Stray or late datagram; keep waiting until the deadline.
        if ctx.err().is_some() {
            return Err(NetError::Timeout("DNS response"));
        }
    }
}

fn tcp_exchange(mut conn: Conn, ctx: &DialContext, query: &[u8]) -> NetResult<Vec<u8>> {
    let result = (|| -> io::Result<Vec<u8>> {
        apply_deadline(&*conn, ctx)?;
        let len = u16::try_from(query.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query too large"))?;
        let mut framed = Vec::with_capacity(query.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(query);
        conn.write_all(&framed)?;

        let mut len = [0u8; 2];
        conn.read_exact(&mut len)?;
        let mut response = vec![0u8; usize::from(u16::from_be_bytes(len))];
        conn.read_exact(&mut response)?;
        Ok(response)
    })();
    let _ = conn.shutdown();
    result.map_err(map_timeout)
}

fn validate_name(name: &str) -> NetResult<()> {
    let invalid = |why: &str| Err(NetError::Dns(format!("invalid name '{name}': {why}")));
    if name.is_empty() {
        return invalid("empty");
    }
    if name.len() > 253 {
        return invalid("too long");
    }
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return invalid("bad label length");
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return invalid("bad character");
        }
    }
    Ok(())
}

/// Encode a recursive query for `name`.
fn build_query(id: u16, name: &str, qtype: u16) -> NetResult<Vec<u8>> {
    validate_name(name)?;
    let mut msg = Vec::with_capacity(18 + name.len());
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&FLAG_RD.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(msg)
}

fn header_flags(msg: &[u8]) -> u16 {
    match msg {
        [_, _, hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    }
}

fn truncated_message() -> NetError {
    NetError::Dns("truncated DNS message".into())
}

fn read_u16(msg: &[u8], at: usize) -> NetResult<u16> {
    msg.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(truncated_message)
}

/// Offset just past the (possibly compressed) name starting at `at`.
fn skip_name(msg: &[u8], mut at: usize) -> NetResult<usize> {
    loop {
        let len = *msg.get(at).ok_or_else(truncated_message)?;
        match len {
            0 => return Ok(at + 1),
            l if l & 0xC0 == 0xC0 => return Ok(at + 2),
            l => at += 1 + usize::from(l),
        }
    }
}

fn parse_response(id: u16, msg: &[u8]) -> NetResult<Answer> {
    if msg.len() < 12 {
        return Err(truncated_message());
    }
    if read_u16(msg, 0)? != id {
        return Err(NetError::Dns("response id mismatch".into()));
    }
    let flags = read_u16(msg, 2)?;
    if flags & FLAG_QR == 0 {
        return Err(NetError::Dns("message is not a response".into()));
    }
    match flags & 0x000F {
        0 => {}
        RCODE_NXDOMAIN => return Ok(Answer::NotFound),
        rcode => return Err(NetError::Dns(format!("server returned rcode {rcode}"))),
    }

    let questions = read_u16(msg, 4)?;
    let answers = read_u16(msg, 6)?;
    let mut at = 12;
    for _ in 0..questions {
        at = skip_name(msg, at)? + 4;
    }

    let mut addresses = Vec::new();
    for _ in 0..answers {
        at = skip_name(msg, at)?;
        let rtype = read_u16(msg, at)?;
        let rdlen = usize::from(read_u16(msg, at + 8)?);
        let start = at + 10;
        let rdata = msg.get(start..start + rdlen).ok_or_else(truncated_message)?;
        match (rtype, rdata.len()) {
            (TYPE_A, 4) => {
                let octets: [u8; 4] = [rdata[0], rdata[1], rdata[2], rdata[3]];
                addresses.push(IpAddr::V4(Ipv4Addr::from(octets)));
            }
            (TYPE_AAAA, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                addresses.push(IpAddr::V6(Ipv6Addr::from(octets)));
            }
            _ => {}
        }
        at = start + rdlen;
    }
    Ok(Answer::Addresses(addresses))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::driver::{Connection, NetDriver};

    fn response_for(query: &[u8]) -> Vec<u8> {
        let qtype = u16::from_be_bytes([query[query.len() - 4], query[query.len() - 3]]);
        let mut msg = query[..2].to_vec();
        msg.extend_from_slice(&(FLAG_QR | FLAG_RD | 0x0080).to_be_bytes());
        msg.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 0]);
        msg.extend_from_slice(&query[12..]);
        // Answer name is a pointer back to the question.
        msg.extend_from_slice(&[0xC0, 0x0C]);
        msg.extend_from_slice(&qtype.to_be_bytes());
        msg.extend_from_slice(&CLASS_IN.to_be_bytes());
        msg.extend_from_slice(&300u32.to_be_bytes());
        if qtype == TYPE_A {
            msg.extend_from_slice(&4u16.to_be_bytes());
            msg.extend_from_slice(&[93, 184, 216, 34]);
        } else {
            msg.extend_from_slice(&16u16.to_be_bytes());
            msg.extend_from_slice(&"2606:2800:220:1::1".parse::<Ipv6Addr>().unwrap().octets());
        }
        msg
    }

    /// Answers TCP-framed queries; refuses UDP like a proxy driver would.
    #[derive(Debug, Default)]
    struct TcpOnlyServer {
        dials: Mutex<Vec<Network>>,
    }

    #[derive(Debug, Default)]
    struct FramedConn {
        pending: VecDeque<u8>,
    }

    impl Read for FramedConn {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.pending.len());
            for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for FramedConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let response = response_for(&buf[2..]);
            self.pending
                .extend((response.len() as u16).to_be_bytes().iter().copied());
            self.pending.extend(response);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for FramedConn {
        fn set_read_timeout(&self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
        fn set_write_timeout(&self, _: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 1)))
        }
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 53)))
        }
        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    impl NetDriver for TcpOnlyServer {
        fn name(&self) -> &str {
            "tcp-only"
        }

        fn dial(&self, _ctx: &DialContext, network: Network, _address: &str) -> NetResult<Conn> {
            self.dials.lock().push(network);
            match network {
                Network::Udp => Err(NetError::UnsupportedNetwork {
                    driver: "tcp-only".into(),
                    network,
                }),
                Network::Tcp => Ok(Box::new(FramedConn::default())),
            }
        }
    }

    #[test]
    fn test_build_query() {
        let query = build_query(0xABCD, "a.bc", TYPE_A).unwrap();
        assert_eq!(
            query,
            vec![
                0xAB, 0xCD, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 1, b'a', 2, b'b', b'c', 0, 0, 1,
                0, 1
            ]
        );
        assert!(build_query(1, "bad..name", TYPE_A).is_err());
    }

    #[test]
    fn test_parse_compressed_answer() {
        let query = build_query(7, "example.com", TYPE_A).unwrap();
        match parse_response(7, &response_for(&query)).unwrap() {
            Answer::Addresses(found) => {
                assert_eq!(found, vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]);
            }
            Answer::NotFound => panic!("expected addresses"),
        }
        assert!(parse_response(8, &response_for(&query)).is_err());
    }

    #[test]
    fn test_nxdomain() {
        let query = build_query(9, "nope.example", TYPE_A).unwrap();
        let mut response = response_for(&query);
        response[3] |= RCODE_NXDOMAIN as u8;
        assert!(matches!(parse_response(9, &response).unwrap(), Answer::NotFound));
    }

    #[test]
    fn test_falls_back_to_tcp_when_udp_unsupported() {
        let driver = Arc::new(TcpOnlyServer::default());
        let resolver = Resolver::new(driver.clone(), ResolverConfig::new().with_servers(["10.0.0.53:53"]));

        let found = resolver.lookup("example.com").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&"2606:2800:220:1::1".parse::<IpAddr>().unwrap()));
        assert_eq!(
            *driver.dials.lock(),
            vec![Network::Udp, Network::Tcp, Network::Udp, Network::Tcp]
        );
    }

    #[test]
    fn test_literals_skip_the_network() {
        let driver = Arc::new(TcpOnlyServer::default());
        let resolver = Resolver::new(driver.clone(), ResolverConfig::default());
        assert_eq!(
            resolver.lookup("127.0.0.1").unwrap(),
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        );
        assert_eq!(resolver.lookup("localhost").unwrap().len(), 2);
        assert!(driver.dials.lock().is_empty());
    }
}
