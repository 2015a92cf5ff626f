//! The `serve` command: host the command registry.

use std::time::Duration;

use tracing::info;
use tunnelcli_server::{
    CommandRegistry, Server, ServerConfig, SignalHandler, load_authorized_keys,
};

use crate::cli::ServeArgs;
use crate::error::{ClientError, ClientResult};

/// Builds the server configuration from the command line.
pub fn server_config(args: &ServeArgs) -> ClientResult<ServerConfig> {
    let mut config = ServerConfig::new(args.bind)
        .with_connection_timeout(Duration::from_secs(args.connection_timeout))
        .with_max_connections(args.max_connections);

    if let Some(addr) = args.tcp_bind {
        config = config.with_tcp_bind(addr);
    }
    if let Some(path) = &args.server_identity {
        config = config.with_identity_key(path);
    }
    if let Some(path) = &args.authorized_keys {
        if args.tcp_bind.is_none() {
            return Err(ClientError::Config(
                "--authorized-keys needs --tcp-bind".to_string(),
            ));
        }
        config = config.with_authorized_keys(load_authorized_keys(path)?);
    }
    if let Some(value) = &args.require_auth {
        config = config.with_authorization(value.clone());
    }
    Ok(config)
}

/// Serves the built-in commands until SIGTERM or SIGINT.
pub fn serve(args: &ServeArgs) -> ClientResult<()> {
    let config = server_config(args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let signals = SignalHandler::new();
        signals.spawn_listener();

        let server = Server::bind(&config, CommandRegistry::with_builtins()).await?;
        info!(addr = %server.local_addr()?, "serving");
        server
            .run_until_shutdown(signals.shutdown_handle().signal())
            .await?;
        Ok::<(), ClientError>(())
    })
}
