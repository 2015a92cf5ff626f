//! CLI, HTTP and socket transports, client connection
//!
//! This crate provides the `tunnelcli` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod secret;
pub mod transport;

pub use cli::Cli;
pub use connection::{NO_EXIT_CODE, run_command};
pub use error::{ClientError, ClientResult};
