//! Carries a blocking driver connection into the client runtime.
//!
//! Drivers hand out blocking streams. hyper and TLS run over one end of an
//! in-memory duplex; two pump threads copy bytes between the other end and
//! the connection. Shutting the connection down ends both pumps.

use std::io::{self, Read, Write};
use std::thread;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tracing::trace;

use crate::driver::Conn;

/// Duplex capacity and pump buffer size.
const PUMP_BUFFER: usize = 16 * 1024;

/// Attach `conn` to a fresh duplex and return the async end.
///
/// The caller keeps its own handle to the connection for shutdown; on error
/// it must shut that handle down, since a pump may already be running.
pub(crate) fn bridge(conn: Conn, handle: &Handle) -> io::Result<DuplexStream> {
    conn.set_read_timeout(None)?;
    conn.set_write_timeout(None)?;
    let writer = conn.try_clone()?;

    let (local, remote) = tokio::io::duplex(PUMP_BUFFER);
    let (from_client, to_client) = tokio::io::split(remote);

    let inbound = handle.clone();
    thread::Builder::new()
        .name("warden-http-in".into())
        .spawn(move || pump_inbound(conn, to_client, &inbound))?;
    let outbound = handle.clone();
    thread::Builder::new()
        .name("warden-http-out".into())
        .spawn(move || pump_outbound(writer, from_client, &outbound))?;
    Ok(local)
}

/// Connection to client: ends on EOF, a read error, or a closed duplex.
fn pump_inbound(mut conn: Conn, mut sink: WriteHalf<DuplexStream>, handle: &Handle) {
    let mut buf = vec![0u8; PUMP_BUFFER];
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!(error = %e, "Inbound pump stopped");
                break;
            }
        };
        if handle.block_on(sink.write_all(&buf[..n])).is_err() {
            break;
        }
    }
    // EOF for the client side.
    let _ = handle.block_on(sink.shutdown());
}

/// Client to connection: ends when the client drops its end.
fn pump_outbound(mut conn: Conn, mut source: ReadHalf<DuplexStream>, handle: &Handle) {
    let mut buf = vec![0u8; PUMP_BUFFER];
    loop {
        let n = match handle.block_on(source.read(&mut buf)) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Err(e) = conn.write_all(&buf[..n]).and_then(|()| conn.flush()) {
            trace!(error = %e, "Outbound pump stopped");
            break;
        }
    }
}
