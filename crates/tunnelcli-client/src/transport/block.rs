//! Upload leg as a chain of bounded requests.
//!
//! Used when something between client and server buffers request bodies, so
//! a never-ending chunked upload would never arrive.

use std::io::{self, Read};

use tracing::{debug, trace};
use tunnelcli_core::{BlockSource, DEFAULT_BLOCK_SIZE};
use tunnelcli_protocol::tunnel::Side;

use super::http::{Leg, check_leg};

/// [`BlockSource`] sending each block as one `upload-block` request.
pub struct BlockUpload {
    leg: Leg,
}

impl BlockUpload {
    pub(crate) fn new(leg: Leg) -> Self {
        Self { leg }
    }
}

impl BlockSource for BlockUpload {
    type Block = Vec<u8>;

    fn open(&mut self, index: usize) -> io::Result<Vec<u8>> {
        trace!(index, "buffering upload block");
        Ok(Vec::with_capacity(DEFAULT_BLOCK_SIZE))
    }

    /// Posts the block and waits for the one-byte confirmation, so blocks
    /// reach the server strictly in order.
    fn finish(&mut self, index: usize, block: Vec<u8>) -> io::Result<()> {
        let len = block.len();
        let mut response = self
            .leg
            .request(Side::UploadBlock)
            .body(block)
            .send()
            .map_err(io::Error::other)?;
        check_leg(&response, self.leg.url(), Side::UploadBlock)
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut ack = [0u8; 1];
        response.read_exact(&mut ack)?;
        debug!(index, bytes = len, "upload block confirmed");
        Ok(())
    }
}
