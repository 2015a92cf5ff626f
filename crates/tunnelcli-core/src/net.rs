//! Socket helpers shared by the server listener and the client transport.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};

/// Write side of a socket that half-closes it when dropped.
///
/// The peer sees end of stream on its read side while the socket stays open
/// for reading here, usually through a [`TcpStream::try_clone`] handle.
#[derive(Debug)]
pub struct TcpWriteHalf(TcpStream);

impl TcpWriteHalf {
    pub fn new(stream: TcpStream) -> Self {
        Self(stream)
    }
}

impl Write for TcpWriteHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Drop for TcpWriteHalf {
    fn drop(&mut self) {
        let _ = self.0.shutdown(Shutdown::Write);
    }
}
