//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

/// tunnelcli - Run server commands through an HTTP endpoint or a socket
#[derive(Debug, Parser)]
#[command(name = "tunnelcli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "TUNNELCLI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags selecting and configuring the transport.
#[derive(Debug, Default, Args)]
pub struct ConnectionArgs {
    /// Base URL of the server
    #[arg(long, short = 's', env = "TUNNELCLI_URL", conflicts_with = "tcp")]
    pub url: Option<Url>,

    /// Connect to the socket listener at HOST:PORT instead of HTTP
    #[arg(long)]
    pub tcp: Option<String>,

    /// Authorization header value (supports env:: and pass:: references)
    #[arg(long, env = "TUNNELCLI_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// PKCS#8 key proving the client identity on socket connections
    #[arg(long, short = 'i')]
    pub identity: Option<PathBuf>,

    /// Base64 public key the server must prove on socket connections
    #[arg(long)]
    pub server_key: Option<String>,

    /// Send the upload leg as a series of bounded requests
    #[arg(long)]
    pub block_upload: bool,

    /// Skip the redirect check before opening the tunnel
    #[arg(long)]
    pub no_redirect_check: bool,

    /// Accept any TLS certificate the server presents
    #[arg(long)]
    pub no_certificate_check: bool,

    /// Connect timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a command on the server
    Run {
        /// Command name
        command: String,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Serve commands over HTTP and optionally a raw socket
    Serve(ServeArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options of the `serve` command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address of the HTTP endpoint
    #[arg(long, default_value = tunnelcli_server::DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Also listen for socket connections on this address
    #[arg(long)]
    pub tcp_bind: Option<SocketAddr>,

    /// PKCS#8 key proving the server identity (ephemeral if absent)
    #[arg(long)]
    pub server_identity: Option<PathBuf>,

    /// File listing the client keys allowed on the socket listener
    #[arg(long)]
    pub authorized_keys: Option<PathBuf>,

    /// Require this Authorization header value on HTTP requests
    #[arg(long, env = "TUNNELCLI_SERVER_AUTH", hide_env_values = true)]
    pub require_auth: Option<String>,

    /// Seconds to wait for the second tunnel leg and for START
    #[arg(long, default_value_t = 15)]
    pub connection_timeout: u64,

    /// Maximum concurrent socket connections
    #[arg(long, default_value_t = 100)]
    pub max_connections: usize,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Show configuration file path
    Path,
}
