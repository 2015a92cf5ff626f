//! Wires the HTTP endpoint and the optional socket listener together.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::SessionRunner;
use crate::http::DuplexEndpoint;
use crate::registry::CommandRegistry;
use crate::signals::ShutdownSignal;
use crate::tcp::SocketListener;

/// A server whose listeners are bound but not yet serving.
pub struct Server {
    http: TcpListener,
    endpoint: DuplexEndpoint,
    socket: Option<SocketListener>,
}

impl Server {
    /// Binds every listener named in `config`.
    pub async fn bind(config: &ServerConfig, registry: CommandRegistry) -> ServerResult<Self> {
        let runner = SessionRunner::new(Arc::new(registry), config.connection_timeout);
        let endpoint = DuplexEndpoint::new(
            runner.clone(),
            config.authorization.clone(),
            config.connection_timeout,
        );

        let http = TcpListener::bind(config.bind)
            .await
            .map_err(|e| ServerError::bind(config.bind, e))?;
        info!(
            addr = %http.local_addr()?,
            commands = runner.registry().len(),
            "HTTP endpoint listening"
        );

        let socket = match config.tcp_bind {
            Some(addr) => Some(SocketListener::bind(addr, config, runner).await?),
            None => None,
        };

        Ok(Self {
            http,
            endpoint,
            socket,
        })
    }

    /// Address of the HTTP endpoint.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    /// Address of the socket listener, when enabled.
    pub fn socket_addr(&self) -> ServerResult<Option<SocketAddr>> {
        self.socket
            .as_ref()
            .map(SocketListener::local_addr)
            .transpose()
    }

    /// The socket listener, when enabled.
    pub fn socket(&self) -> Option<&SocketListener> {
        self.socket.as_ref()
    }

    /// Serves until `shutdown` fires.
    pub async fn run_until_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let Self {
            http,
            endpoint,
            socket,
        } = self;
        let router = endpoint.router();
        let http_shutdown = shutdown.clone();
        let http = async move {
            axum::serve(http, router)
                .with_graceful_shutdown(http_shutdown.wait())
                .await
        };

        match &socket {
            Some(socket) => {
                let (http, socket) = tokio::join!(http, socket.run_until_shutdown(shutdown.wait()));
                http?;
                socket?;
            }
            None => http.await?,
        }
        info!("Server stopped");
        Ok(())
    }
}
