//! Opcode frames and the per-connection reader loop.
//!
//! Every frame is laid out as:
//!
//! ```text
//! +----------------+---------+---------------------+
//! | length (4 BE)  | op (1)  | payload[length]     |
//! +----------------+---------+---------------------+
//! ```
//!
//! `length` counts payload bytes only; it excludes itself and the opcode.

use std::io::{self, Read, Take, Write};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};
use tunnelcli_core::FlightRecorder;

use crate::error::{FrameError, FrameResult};
use crate::op::Op;

/// Size of the frame header: length prefix plus opcode.
pub const HEADER_LEN: usize = 5;

/// Destination for whole frames.
///
/// Implementations write one frame per call and flush it.
pub trait Output: Send {
    /// Writes a single frame.
    fn send(&mut self, op: Op, payload: &[u8]) -> io::Result<()>;

    /// Closes the underlying stream. Later sends fail with `BrokenPipe`.
    fn close(&mut self) -> io::Result<()>;
}

/// [`Output`] over any byte writer.
#[derive(Debug)]
pub struct FramedOutput<W> {
    inner: Option<W>,
}

impl<W: Write> FramedOutput<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Returns true once the output has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<W: Write + Send> Output for FramedOutput<W> {
    fn send(&mut self, op: Op, payload: &[u8]) -> io::Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "frame output closed"))?;
        inner.write_all(&encode_header(op, payload.len())?)?;
        inner.write_all(payload)?;
        inner.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

/// Encodes the five header bytes of a frame.
pub fn encode_header(op: Op, payload_len: usize) -> io::Result<[u8; HEADER_LEN]> {
    let len = i32::try_from(payload_len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{op} payload of {payload_len} bytes is too large"),
        )
    })?;
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&len.to_be_bytes());
    header[4] = op.code();
    Ok(header)
}

/// Encodes a complete frame into a buffer.
pub fn encode_frame(op: Op, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&encode_header(op, payload.len())?);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Receives the frames parsed by a [`FrameReader`].
pub trait FrameHandler {
    /// Handles one frame whose payload is exposed as a bounded reader.
    ///
    /// Returns `Ok(false)` if `op` is not valid for this side; the reader
    /// then skips the payload. A handler that returns `Ok(true)` must
    /// consume the whole payload.
    fn handle(&mut self, op: Op, payload: &mut dyn Read) -> io::Result<bool>;

    /// Called once when the reader loop ends, however it ends.
    fn handle_close(&mut self) {}
}

enum Fault {
    Corrupt(io::Error),
    Handler(Op, io::Error),
}

/// Reader loop that parses frames from one connection direction.
///
/// Every byte read goes through a [`FlightRecorder`] so a desynchronized
/// stream can be explained after the fact.
pub struct FrameReader<R> {
    recorder: FlightRecorder<R>,
    label: String,
}

impl<R: Read + Send + 'static> FrameReader<R> {
    /// Creates a reader over `source`.
    pub fn new(source: R) -> Self {
        Self {
            recorder: FlightRecorder::new(source),
            label: "frame reader".to_string(),
        }
    }

    /// Sets the label used in diagnostics and as the thread name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Runs the loop until the stream ends or faults.
    ///
    /// A clean end of stream at a frame boundary returns `Ok(())`. Any
    /// framing violation returns [`FrameError::Corrupt`] with the recorded
    /// bytes around the failure.
    pub fn run<H: FrameHandler + ?Sized>(mut self, handler: &mut H) -> FrameResult<()> {
        let result = loop {
            match self.next_frame(handler) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(label = %self.label, "stream closed");
                    break Ok(());
                }
                Err(Fault::Handler(op, source)) => break Err(FrameError::Handler { op, source }),
                Err(Fault::Corrupt(cause)) => {
                    warn!(label = %self.label, error = %cause, "stream corrupted");
                    let diagnosis = self.recorder.analyze_crash(cause, &self.label);
                    break Err(FrameError::Corrupt(Box::new(diagnosis)));
                }
            }
        };
        handler.handle_close();
        result
    }

    /// Runs the loop on a dedicated named thread.
    pub fn spawn<H>(self, mut handler: H) -> io::Result<JoinHandle<FrameResult<()>>>
    where
        H: FrameHandler + Send + 'static,
    {
        let name = self.label.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&mut handler))
    }

    /// Reads and dispatches one frame. `Ok(false)` means a clean close.
    fn next_frame<H: FrameHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool, Fault> {
        let Some(len) = self.read_length().map_err(Fault::Corrupt)? else {
            return Ok(false);
        };
        let len = u64::try_from(len).map_err(|_| {
            Fault::Corrupt(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt stream: negative frame length {len}"),
            ))
        })?;

        let mut code = [0u8; 1];
        self.recorder
            .read_exact(&mut code)
            .map_err(|e| Fault::Corrupt(context(e, "reading opcode")))?;

        let Some(op) = Op::from_u8(code[0]) else {
            warn!(code = code[0], len, "skipping unknown operation");
            self.skip_exactly(len)?;
            return Ok(true);
        };
        trace!(%op, len, "handling frame");

        let mut payload = (&mut self.recorder).take(len);
        match handler.handle(op, &mut payload) {
            Ok(true) => expect_consumed(op, len, &payload),
            Ok(false) => {
                warn!(%op, "unhandled operation for this side, skipping");
                drain(op, &mut payload)?;
                expect_consumed(op, len, &payload)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                Err(Fault::Corrupt(context(e, &format!("reading {op} payload"))))
            }
            Err(e) => Err(Fault::Handler(op, e)),
        }
    }

    /// Reads the length prefix; `None` on EOF before its first byte.
    fn read_length(&mut self) -> io::Result<Option<i32>> {
        let mut buf = [0u8; 4];
        loop {
            match self.recorder.read(&mut buf[..1]) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.recorder
            .read_exact(&mut buf[1..])
            .map_err(|e| context(e, "reading frame length"))?;
        Ok(Some(i32::from_be_bytes(buf)))
    }

    fn skip_exactly(&mut self, len: u64) -> Result<(), Fault> {
        let skipped = self.recorder.skip(len).map_err(Fault::Corrupt)?;
        if skipped < len {
            return Err(Fault::Corrupt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("EOF after {skipped} of {len} skipped payload bytes"),
            )));
        }
        Ok(())
    }
}

fn drain<R: Read>(op: Op, payload: &mut Take<R>) -> Result<(), Fault> {
    io::copy(payload, &mut io::sink())
        .map(|_| ())
        .map_err(|e| Fault::Corrupt(context(e, &format!("skipping {op} payload"))))
}

fn expect_consumed<R>(op: Op, len: u64, payload: &Take<R>) -> Result<bool, Fault> {
    let unread = payload.limit();
    if unread == 0 {
        return Ok(true);
    }
    Err(Fault::Corrupt(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "{op} frame declared {len} payload bytes but {} were read",
            len - unread
        ),
    )))
}

fn context(e: io::Error, what: &str) -> io::Error {
    io::Error::new(e.kind(), format!("{what}: {e}"))
}
