//! Raw socket listener for CLI connections.
//!
//! Each accepted connection runs the key-agreement handshake and then carries
//! opcode frames directly, without any HTTP wrapping.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use tunnelcli_core::TcpWriteHalf;
use tunnelcli_protocol::handshake::server_handshake;
use tunnelcli_protocol::{FramedOutput, IdentityKey, PeerIdentity, ServerSide};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{SessionOutcome, SessionRunner};

/// Socket listener serving CLI sessions after a handshake.
pub struct SocketListener {
    listener: TcpListener,
    connection_semaphore: Arc<Semaphore>,
    key: Arc<IdentityKey>,
    authorized_keys: Arc<Vec<String>>,
    handshake_timeout: Duration,
    runner: SessionRunner,
}

impl SocketListener {
    /// Binds `addr` and loads the server identity from `config`.
    ///
    /// Without a configured key file an ephemeral key is generated, so
    /// clients cannot pin it across restarts.
    pub async fn bind(
        addr: SocketAddr,
        config: &ServerConfig,
        runner: SessionRunner,
    ) -> ServerResult<Self> {
        let key = match &config.identity_key {
            Some(path) => IdentityKey::load(path)?,
            None => {
                warn!("no identity key configured, using an ephemeral one");
                IdentityKey::ephemeral()?
            }
        };

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e))?;
        info!(
            addr = %listener.local_addr()?,
            fingerprint = %key.identity().fingerprint(),
            "Socket listener ready"
        );

        Ok(Self {
            listener,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            key: Arc::new(key),
            authorized_keys: Arc::new(config.authorized_keys.clone()),
            handshake_timeout: config.connection_timeout,
            runner,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Identity proven to connecting clients.
    pub fn identity(&self) -> PeerIdentity {
        self.key.identity()
    }

    /// Accepts one connection and serves it on a blocking worker.
    pub async fn accept(&self) -> ServerResult<()> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::worker("connection limiter closed"))?;

        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "Accepted socket connection");
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;

        let connection = SocketConnection {
            stream,
            peer,
            key: self.key.clone(),
            authorized_keys: self.authorized_keys.clone(),
            handshake_timeout: self.handshake_timeout,
            runner: self.runner.clone(),
            _permit: permit,
        };
        tokio::task::spawn_blocking(move || match connection.serve() {
            Ok(outcome) => debug!(%peer, ?outcome, "socket session ended"),
            Err(e) => warn!(%peer, error = %e, "socket session failed"),
        });
        Ok(())
    }

    /// Runs the accept loop until an unrecoverable error.
    pub async fn run(&self) -> ServerResult<()> {
        loop {
            if let Err(e) = self.accept().await {
                if matches!(e, ServerError::Worker { .. }) {
                    return Err(e);
                }
                error!(error = %e, "Failed to accept connection");
            }
        }
    }

    /// Runs the accept loop until `shutdown` completes.
    pub async fn run_until_shutdown<S>(&self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Socket listener stopped");
                Ok(())
            }
        }
    }
}

struct SocketConnection {
    stream: TcpStream,
    peer: SocketAddr,
    key: Arc<IdentityKey>,
    authorized_keys: Arc<Vec<String>>,
    handshake_timeout: Duration,
    runner: SessionRunner,
    _permit: OwnedSemaphorePermit,
}

impl SocketConnection {
    fn serve(mut self) -> ServerResult<SessionOutcome> {
        self.stream.set_nodelay(true)?;
        self.stream.set_read_timeout(Some(self.handshake_timeout))?;
        let client = server_handshake(&mut self.stream, &self.key, &self.authorized_keys)?;
        self.stream.set_read_timeout(None)?;

        let label = match &client {
            Some(identity) => format!("socket {} ({})", self.peer, identity.fingerprint()),
            None => format!("socket {}", self.peer),
        };
        let reader = self.stream.try_clone()?;
        let server = ServerSide::new(FramedOutput::new(TcpWriteHalf::new(self.stream)));
        self.runner.run(reader, server, &label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use tunnelcli_protocol::handshake::client_handshake;
    use tunnelcli_protocol::{
        ClientDispatch, ClientHandler, ClientSide, FrameReader, HandshakeError, KeyAlgorithm,
    };

    use crate::registry::CommandRegistry;

    fn runner() -> SessionRunner {
        SessionRunner::new(
            Arc::new(CommandRegistry::with_builtins()),
            Duration::from_secs(5),
        )
    }

    async fn listener(config: ServerConfig) -> Arc<SocketListener> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Arc::new(SocketListener::bind(addr, &config, runner()).await.unwrap());
        let accepting = listener.clone();
        tokio::spawn(async move { accepting.run().await });
        listener
    }

    #[derive(Default)]
    struct Output {
        stdout: Vec<u8>,
        exit: Option<i32>,
    }

    impl ClientHandler for Output {
        fn on_exit(&mut self, code: i32) {
            self.exit = Some(code);
        }
        fn on_stdout(&mut self, chunk: Vec<u8>) -> io::Result<()> {
            self.stdout.extend(chunk);
            Ok(())
        }
        fn on_stderr(&mut self, _chunk: Vec<u8>) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_version(
        addr: SocketAddr,
        identity: Option<&IdentityKey>,
        pinned: Option<&str>,
    ) -> Result<Output, HandshakeError> {
        let mut stream = TcpStream::connect(addr).unwrap();
        client_handshake(&mut stream, identity, pinned)?;

        let client = ClientSide::new(FramedOutput::new(stream.try_clone().unwrap()));
        client.send_arg("version").unwrap();
        client.send_start().unwrap();
        client.send_end_stdin().unwrap();

        let mut dispatch = ClientDispatch(Output::default());
        FrameReader::new(stream).run(&mut dispatch).unwrap();
        Ok(dispatch.0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn anonymous_client_runs_command() {
        let listener = listener(ServerConfig::default()).await;
        let addr = listener.local_addr().unwrap();
        let pinned = listener.identity().encoded_public_key();

        let output = tokio::task::spawn_blocking(move || run_version(addr, None, Some(pinned.as_str())))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(output.stdout).unwrap(),
            format!("{}\n", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(output.exit, Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authorized_keys_gate_clients() {
        let allowed = IdentityKey::from_pkcs8(
            &IdentityKey::generate_pkcs8(KeyAlgorithm::Ed25519).unwrap(),
        )
        .unwrap();
        let config = ServerConfig::default()
            .with_authorized_keys([allowed.identity().encoded_public_key()]);
        let listener = listener(config).await;
        let addr = listener.local_addr().unwrap();

        let refused = tokio::task::spawn_blocking(move || run_version(addr, None, None))
            .await
            .unwrap();
        match refused {
            Err(HandshakeError::Rejected(reason)) => assert_eq!(reason, "authentication required"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("anonymous client accepted"),
        }

        let output =
            tokio::task::spawn_blocking(move || run_version(addr, Some(&allowed), None))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(output.exit, Some(0));
    }
}
