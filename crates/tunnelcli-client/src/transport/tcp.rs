//! Raw socket tunnel guarded by the key-agreement handshake.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};
use tunnelcli_core::TcpWriteHalf;
use tunnelcli_protocol::IdentityKey;
use tunnelcli_protocol::handshake::client_handshake;

use super::Tunnel;
use crate::error::{ClientError, ClientResult};

/// Opens handshaken socket connections to a `host:port`.
pub struct SocketTunnel {
    address: String,
    timeout: Duration,
    identity: Option<IdentityKey>,
    server_key: Option<String>,
}

impl SocketTunnel {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            identity: None,
            server_key: None,
        }
    }

    /// Builder: prove this identity to the server.
    pub fn with_identity(mut self, key: IdentityKey) -> Self {
        self.identity = Some(key);
        self
    }

    /// Builder: only accept a server proving this base64 public key.
    pub fn with_server_key(mut self, key: impl Into<String>) -> Self {
        self.server_key = Some(key.into());
        self
    }

    pub fn connect(&self) -> ClientResult<Tunnel> {
        let mut stream = self.dial()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.timeout))?;
        let server = client_handshake(
            &mut stream,
            self.identity.as_ref(),
            self.server_key.as_deref(),
        )?;
        stream.set_read_timeout(None)?;
        info!(address = %self.address, fingerprint = %server.fingerprint(), "server identity verified");

        let input = stream.try_clone()?;
        Ok(Tunnel::new(input, TcpWriteHalf::new(stream)))
    }

    fn dial(&self) -> ClientResult<TcpStream> {
        let addrs = self.address.to_socket_addrs().map_err(|e| {
            ClientError::Connection(format!("cannot resolve {}: {}", self.address, e))
        })?;

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses");
        for addr in addrs {
            debug!(%addr, "connecting");
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }
        Err(ClientError::Connection(format!(
            "failed to connect to {}: {}",
            self.address, last_error
        )))
    }
}
