//! Server side of the CLI tunnel.
//!
//! This crate runs named commands on behalf of remote clients:
//! - A registry of [`CliCommand`]s looked up by name
//! - A session runner speaking the opcode frame protocol
//! - A duplex HTTP endpoint pairing `download` and `upload` legs
//! - An optional raw socket listener guarded by a key-agreement handshake
//!
//! # Example
//!
//! ```rust,no_run
//! use tunnelcli_server::{CommandRegistry, Server, ServerConfig, SignalHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(&config, CommandRegistry::with_builtins()).await?;
//!
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!     server.run_until_shutdown(signals.shutdown_handle().signal()).await?;
//!     Ok(())
//! }
//! ```

mod bridge;
mod config;
mod error;
mod handler;
mod http;
mod registry;
mod server;
mod signals;
mod tcp;

pub use config::{DEFAULT_BIND, ServerConfig, load_authorized_keys};
pub use error::{ServerError, ServerResult};
pub use handler::{SessionOutcome, SessionRunner};
pub use http::DuplexEndpoint;
pub use registry::{CliCommand, CommandContext, CommandRegistry, HelpCommand, VersionCommand};
pub use server::Server;
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use tcp::SocketListener;
