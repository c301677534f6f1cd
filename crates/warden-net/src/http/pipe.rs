//! A bounded in-process byte pipe for streamed request bodies.
//!
//! The producer runs on its own thread and writes into a [`PipeWriter`];
//! the transport reads the [`PipeReader`]. A producer that fails, or exits
//! without calling [`PipeWriter::close`], makes the reader return an error
//! instead of a silently truncated body.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use bytes::Bytes;

/// Frames buffered between producer and consumer.
const PIPE_DEPTH: usize = 16;

enum Frame {
    Data(Bytes),
    End,
    Error(io::Error),
}

/// Write half of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    tx: SyncSender<Frame>,
}

impl PipeWriter {
    /// Finish the stream successfully.
    pub fn close(self) {
        let _ = self.tx.send(Frame::End);
    }

    /// Finish the stream with an error the reader will observe.
    pub fn close_with_error(self, err: io::Error) {
        let _ = self.tx.send(Frame::Error(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Frame::Data(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read half of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Frame>,
    current: Bytes,
    finished: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            if self.finished {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Frame::Data(chunk)) => self.current = chunk,
                Ok(Frame::End) => self.finished = true,
                Ok(Frame::Error(err)) => {
                    self.finished = true;
                    return Err(err);
                }
                Err(_) => {
                    self.finished = true;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body producer exited without finishing",
                    ));
                }
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(b) => write!(f, "Data({} bytes)", b.len()),
            Self::End => f.write_str("End"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Create a connected pipe.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(PIPE_DEPTH);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            current: Bytes::new(),
            finished: false,
        },
    )
}

/// Run `produce` on a background thread writing into a new pipe and return
/// the read half.
///
/// # Errors
///
/// Fails only when the thread cannot be spawned.
pub fn spawn_producer<F>(name: &str, produce: F) -> io::Result<PipeReader>
where
    F: FnOnce(&mut PipeWriter) -> io::Result<()> + Send + 'static,
{
    let (mut writer, reader) = pipe();
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || match produce(&mut writer) {
            Ok(()) => writer.close(),
            Err(err) => writer.close_with_error(err),
        })?;
    Ok(reader)
}
