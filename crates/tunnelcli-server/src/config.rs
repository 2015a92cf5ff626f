//! Server configuration.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tunnelcli_protocol::handshake::parse_authorized_key;

use crate::error::{ServerError, ServerResult};

/// Default address of the HTTP endpoint.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP endpoint listens on.
    pub bind: SocketAddr,

    /// Address of the optional socket listener.
    pub tcp_bind: Option<SocketAddr>,

    /// How long to wait for the other tunnel leg and for START.
    pub connection_timeout: Duration,

    /// Maximum concurrent socket connections.
    pub max_connections: usize,

    /// Expected `Authorization` header value, if any.
    pub authorization: Option<String>,

    /// PKCS#8 key proving the server identity on socket connections.
    pub identity_key: Option<PathBuf>,

    /// Base64 public keys allowed to connect over the socket listener.
    /// Empty means anyone may connect.
    pub authorized_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tcp_bind: None,
            connection_timeout: Duration::from_secs(15),
            max_connections: 100,
            authorization: None,
            identity_key: None,
            authorized_keys: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `bind`.
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    /// Builder: enable the socket listener.
    pub fn with_tcp_bind(mut self, addr: SocketAddr) -> Self {
        self.tcp_bind = Some(addr);
        self
    }

    /// Builder: set connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: require an `Authorization` header value.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Builder: set the identity key file.
    pub fn with_identity_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_key = Some(path.into());
        self
    }

    /// Builder: add authorized client keys.
    pub fn with_authorized_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.authorized_keys.extend(keys);
        self
    }
}

/// Reads an authorized-keys file, one key per line.
pub fn load_authorized_keys(path: &Path) -> ServerResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        ServerError::config(format!(
            "cannot read authorized keys {}: {e}",
            path.display()
        ))
    })?;
    Ok(content.lines().filter_map(parse_authorized_key).collect())
}
