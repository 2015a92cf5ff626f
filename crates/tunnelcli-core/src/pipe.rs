//! In-memory blocking byte pipe between threads.
//!
//! Used wherever one thread produces bytes that another consumes through
//! [`Read`]: a command's stdin fed from STDIN frames, or an HTTP upload body
//! fed by the frame writer.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};

/// Number of chunks that may be queued before the writer blocks.
pub const DEFAULT_PIPE_DEPTH: usize = 64;

/// Creates a connected writer/reader pair with the default depth.
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_depth(DEFAULT_PIPE_DEPTH)
}

/// Creates a connected writer/reader pair that queues at most `depth` chunks.
pub fn pipe_with_depth(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(depth.max(1));
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

/// Writing end of a [`pipe`]. Dropping or closing it signals end of stream.
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<SyncSender<Vec<u8>>>,
}

impl PipeWriter {
    /// Closes the pipe; the reader sees end of stream once drained.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                // All writers gone: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}
