//! Logging for the `tunnelcli` binary.
//!
//! Events always go to stderr, because the client's stdout carries the remote
//! command's output unchanged. The filter comes from `RUST_LOG` when set, then
//! from the `[logging] filter` directives of the client config, and finally
//! from the configured level applied to every `tunnelcli_*` crate.
//!
//! ```ignore
//! use tunnelcli_core::tracing::{init_tracing, LogFormat, TracingConfig};
//!
//! // `tunnelcli run`
//! init_tracing(TracingConfig::client())?;
//!
//! // `tunnelcli serve --json-logs`
//! init_tracing(TracingConfig::server(LogFormat::Json))?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
}

/// How each event is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One short line per event.
    #[default]
    Compact,
    /// One JSON object per line, for log collectors in front of a server.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level for the `tunnelcli_*` crates when no filter is given.
    pub level: Level,
    pub format: LogFormat,
    /// Print the target and source line of each event.
    pub source_locations: bool,
    pub timestamps: bool,
    /// `EnvFilter` directives, e.g. `tunnelcli_protocol=trace`.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::client()
    }
}

impl TracingConfig {
    /// Warnings only, undecorated: the user is reading command output.
    #[must_use]
    pub fn client() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            source_locations: false,
            timestamps: false,
            filter: None,
        }
    }

    /// `--debug` on a client command.
    #[must_use]
    pub fn client_debug() -> Self {
        Self {
            level: Level::DEBUG,
            source_locations: true,
            ..Self::client()
        }
    }

    /// Long-running `serve`: session lifecycle at INFO, with timestamps.
    #[must_use]
    pub fn server(format: LogFormat) -> Self {
        Self {
            level: Level::INFO,
            format,
            source_locations: true,
            timestamps: true,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Uses `filter` instead of the level when it is set.
    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => format!("tunnelcli={}", self.level),
        }
    }
}

/// Installs the global subscriber. Call once, before any command runs.
///
/// # Errors
///
/// Fails when a subscriber is already installed or when the configured
/// filter does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())?,
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.source_locations)
        .with_line_number(config.source_locations)
        .with_target(config.source_locations);

    match config.format {
        LogFormat::Compact => {
            let layer = layer.compact();
            let layer = if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            };
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(filter).with(layer),
            )?;
        }
        LogFormat::Json => {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.json()),
            )?;
        }
    }

    Ok(())
}
