//! One continuous output stream over a chain of bounded blocks.
//!
//! Some transports cannot carry an unbounded request body. A
//! [`BlockChainedWriter`] splits the stream into blocks of at most
//! `block_size` bytes, asks its [`BlockSource`] for a fresh block when the
//! current one is full, and only opens the next block after the source has
//! confirmed the previous one. Ordering therefore holds even when every block
//! travels over an independent connection.

use std::io::{self, Write};

use tracing::{trace, warn};

/// Default block size used by the HTTP fallback upload.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Supplier of the blocks a [`BlockChainedWriter`] writes into.
pub trait BlockSource {
    /// The sink for one block.
    type Block: Write;

    /// Opens block number `index` (zero based).
    fn open(&mut self, index: usize) -> io::Result<Self::Block>;

    /// Completes a block and returns once the receiver confirmed it.
    fn finish(&mut self, index: usize, block: Self::Block) -> io::Result<()>;
}

/// Writer that spreads its bytes over consecutive bounded blocks.
pub struct BlockChainedWriter<S: BlockSource> {
    source: S,
    block_size: usize,
    current: Option<S::Block>,
    used: usize,
    next_index: usize,
    closed: bool,
}

impl<S: BlockSource> BlockChainedWriter<S> {
    /// Creates a writer using blocks of at most `block_size` bytes.
    pub fn new(source: S, block_size: usize) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            current: None,
            used: 0,
            next_index: 0,
            closed: false,
        }
    }

    /// Returns the number of blocks completed so far.
    pub fn blocks_completed(&self) -> usize {
        if self.current.is_some() {
            self.next_index - 1
        } else {
            self.next_index
        }
    }

    /// Returns a reference to the block source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Completes any partially filled block and refuses further writes.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish_current()
    }

    fn finish_current(&mut self) -> io::Result<()> {
        if let Some(block) = self.current.take() {
            let index = self.next_index - 1;
            trace!(index, bytes = self.used, "finishing block");
            self.used = 0;
            self.source.finish(index, block)?;
        }
        Ok(())
    }
}

impl<S: BlockSource> Write for BlockChainedWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "block chain already closed",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.current.is_none() {
            let index = self.next_index;
            trace!(index, "opening block");
            self.current = Some(self.source.open(index)?);
            self.next_index += 1;
        }

        let n = buf.len().min(self.block_size - self.used);
        if let Some(block) = self.current.as_mut() {
            block.write_all(&buf[..n])?;
        }
        self.used += n;

        if self.used == self.block_size {
            self.finish_current()?;
        }
        Ok(n)
    }

    /// Pushes out a partially filled block so the receiver sees the bytes now.
    fn flush(&mut self) -> io::Result<()> {
        if self.used > 0 {
            self.finish_current()?;
        }
        Ok(())
    }
}

impl<S: BlockSource> Drop for BlockChainedWriter<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to complete last block");
        }
    }
}
