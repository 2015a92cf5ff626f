//! Blocking `Read`/`Write` views over async HTTP bodies.
//!
//! Sessions run on blocking worker threads; request and response bodies live
//! in the async runtime. Bytes cross between the two over bounded channels.

use std::io::{self, Read, Write};

use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::trace;

/// Chunks buffered between a body and its blocking view.
pub const CHANNEL_DEPTH: usize = 16;

/// Blocking reader fed by [`forward_body`].
///
/// Must only be read from a blocking thread.
pub struct BodyReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl BodyReader {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Blocking writer drained by [`response_body`].
///
/// Must only be written from a blocking thread.
pub struct BodyWriter {
    tx: mpsc::Sender<Bytes>,
}

impl BodyWriter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streaming response body that starts with `prefix` and then yields
/// whatever arrives on `rx` until all senders are dropped.
pub fn response_body(prefix: Bytes, rx: mpsc::Receiver<Bytes>) -> Body {
    let head = futures_util::stream::once(async move { Ok::<_, io::Error>(prefix) });
    let tail = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, io::Error>(chunk), rx))
    });
    Body::from_stream(head.chain(tail))
}

/// Copies a request body into `tx`. Returns the number of bytes forwarded.
pub async fn forward_body(body: Body, tx: &mpsc::Sender<Bytes>) -> io::Result<u64> {
    let mut stream = body.into_data_stream();
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        if chunk.is_empty() {
            continue;
        }
        total += chunk.len() as u64;
        trace!(bytes = chunk.len(), "forwarding upload chunk");
        tx.send(chunk)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session ended"))?;
    }
    Ok(total)
}
