//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/tunnelcli/config.toml` by default. Command-line flags override
//! whatever the file says.
//!
//! ```toml
//! [connection]
//! url = "https://ci.example.org/"
//! auth = "env::TUNNELCLI_TOKEN"
//! upload_mode = "block"
//!
//! [socket]
//! address = "ci.example.org:5005"
//! identity = "~/.config/tunnelcli/id_ed25519.p8"
//!
//! [logging]
//! filter = "tunnelcli_protocol=trace,warn"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::secret;

/// Configuration for the tunnelcli client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP tunnel settings.
    pub connection: ConnectionSettings,

    /// Raw socket settings.
    pub socket: SocketSettings,

    pub logging: LoggingSettings,
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `RUST_LOG`-style directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

/// How the upload leg of the HTTP tunnel is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadMode {
    /// One chunked request body for the whole session.
    #[default]
    Streaming,
    /// A sequence of bounded requests, for proxies that buffer bodies.
    Block,
}

/// HTTP tunnel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Base URL of the server.
    pub url: Option<String>,

    /// `Authorization` header value (supports `pass::` and `env::` prefixes).
    pub auth: Option<String>,

    /// Connect timeout in seconds.
    pub timeout_secs: u64,

    pub upload_mode: UploadMode,

    /// Interval between keepalive pings while a command runs.
    pub ping_interval_ms: u64,

    /// Skip the GET that follows redirects before the tunnel opens.
    pub no_redirect_check: bool,

    /// Accept any TLS certificate. For self-signed test servers only.
    pub insecure: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: None,
            auth: None,
            timeout_secs: 15,
            upload_mode: UploadMode::Streaming,
            ping_interval_ms: 3000,
            no_redirect_check: false,
            insecure: false,
        }
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// Returns the authorization value with secret references resolved.
    pub fn resolve_auth(&self) -> ClientResult<Option<String>> {
        self.auth.as_deref().map(secret::resolve).transpose()
    }
}

/// Raw socket settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// `host:port` of the socket listener.
    pub address: Option<String>,

    /// PKCS#8 key proving the client identity.
    pub identity: Option<PathBuf>,

    /// Base64 public key the server must prove.
    pub server_key: Option<String>,
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunnelcli")
    }
}
