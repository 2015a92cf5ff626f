//! tunnelcli entry point.

use std::process::ExitCode;

use clap::Parser;

use tunnelcli_client::cli::{Cli, Command, ConfigAction};
use tunnelcli_client::commands::run::ConnectOptions;
use tunnelcli_client::commands::{config, run, serve};
use tunnelcli_client::config::ClientConfig;
use tunnelcli_client::error::ClientResult;
use tunnelcli_core::{LogFormat, TracingConfig, init_tracing};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let tracing = match &cli.command {
        Command::Serve(args) if args.json_logs => TracingConfig::server(LogFormat::Json),
        Command::Serve(_) => TracingConfig::server(LogFormat::Compact),
        _ if cli.debug => TracingConfig::client_debug(),
        _ => TracingConfig::client(),
    };
    let tracing = if cli.debug {
        tracing.with_level(tracing::Level::DEBUG)
    } else {
        tracing
    };
    if let Err(e) = init_tracing(tracing.with_filter(config.logging.filter.clone())) {
        eprintln!("warning: {}", e);
    }

    match dispatch(&cli, &config) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Runs the selected subcommand and returns the process exit code.
fn dispatch(cli: &Cli, config: &ClientConfig) -> ClientResult<i32> {
    match &cli.command {
        Command::Run { command, args } => {
            let options = ConnectOptions::resolve(&cli.connection, config)?;
            run::run(&options, command, args)
        }
        Command::Serve(args) => serve::serve(args).map(|()| 0),
        Command::Config { action } => {
            let path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
            match action {
                ConfigAction::Dump => config::dump(config, &path)?,
                ConfigAction::Path => config::path(&path)?,
            }
            Ok(0)
        }
    }
}
