//! Ways of obtaining a duplex byte stream to the server.

use std::io::{Read, Write};

pub mod block;
pub mod http;
pub mod tcp;

pub use self::http::HttpTunnel;
pub use self::tcp::SocketTunnel;

/// A connected duplex stream: frames from the server arrive on `input`,
/// frames to the server go to `output`.
///
/// Dropping `output` ends the upload direction.
pub struct Tunnel {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl Tunnel {
    pub fn new(input: impl Read + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }
}
