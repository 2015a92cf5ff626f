//! The `run` command: execute one command on the server.

use std::path::Path;
use std::time::Duration;

use tracing::debug;
use tunnelcli_protocol::IdentityKey;
use url::Url;

use crate::cli::ConnectionArgs;
use crate::config::{ClientConfig, UploadMode};
use crate::connection::{SessionIo, run_command};
use crate::error::{ClientError, ClientResult};
use crate::secret;
use crate::transport::{HttpTunnel, SocketTunnel, Tunnel};

/// Where and how to connect, after merging flags over the config file.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Http {
        url: Url,
        authorization: Option<String>,
        upload_mode: UploadMode,
        follow_redirects: bool,
        check_certificates: bool,
    },
    Socket {
        address: String,
        identity: Option<std::path::PathBuf>,
        server_key: Option<String>,
    },
}

/// Fully resolved connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub endpoint: Endpoint,
    pub timeout: Duration,
    pub ping_interval: Duration,
}

impl ConnectOptions {
    /// Merges command-line flags over `config`. Flags win.
    ///
    /// `--tcp` (or a configured socket address without any URL) selects the
    /// socket transport; otherwise a URL is required.
    pub fn resolve(args: &ConnectionArgs, config: &ClientConfig) -> ClientResult<Self> {
        let connection = &config.connection;
        let timeout = args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| connection.timeout());

        let socket_address = args.tcp.clone().or_else(|| {
            if args.url.is_none() && connection.url.is_none() {
                config.socket.address.clone()
            } else {
                None
            }
        });

        let endpoint = match socket_address {
            Some(address) => Endpoint::Socket {
                address,
                identity: args.identity.clone().or_else(|| config.socket.identity.clone()),
                server_key: args
                    .server_key
                    .clone()
                    .or_else(|| config.socket.server_key.clone()),
            },
            None => {
                let url = match (&args.url, &connection.url) {
                    (Some(url), _) => url.clone(),
                    (None, Some(configured)) => Url::parse(configured).map_err(|e| {
                        ClientError::Config(format!("invalid url {}: {}", configured, e))
                    })?,
                    (None, None) => {
                        return Err(ClientError::Config(
                            "no server given; pass --url or --tcp, or set [connection] url"
                                .to_string(),
                        ));
                    }
                };
                let authorization = match &args.auth {
                    Some(value) => Some(secret::resolve(value)?),
                    None => connection.resolve_auth()?,
                };
                Endpoint::Http {
                    url,
                    authorization,
                    upload_mode: if args.block_upload {
                        UploadMode::Block
                    } else {
                        connection.upload_mode
                    },
                    follow_redirects: !(args.no_redirect_check || connection.no_redirect_check),
                    check_certificates: !(args.no_certificate_check || connection.insecure),
                }
            }
        };

        Ok(Self {
            endpoint,
            timeout,
            ping_interval: connection.ping_interval(),
        })
    }

    /// Opens a tunnel to the endpoint.
    pub fn connect(&self) -> ClientResult<Tunnel> {
        match &self.endpoint {
            Endpoint::Http {
                url,
                authorization,
                upload_mode,
                follow_redirects,
                check_certificates,
            } => {
                let tunnel = if *check_certificates {
                    HttpTunnel::new(url.clone(), self.timeout)?
                } else {
                    HttpTunnel::without_certificate_check(url.clone(), self.timeout)?
                };
                tunnel
                    .with_authorization(authorization.clone())
                    .with_upload_mode(*upload_mode)
                    .with_redirect_check(*follow_redirects)
                    .connect()
            }
            Endpoint::Socket {
                address,
                identity,
                server_key,
            } => {
                let mut tunnel = SocketTunnel::new(address.clone(), self.timeout);
                if let Some(path) = identity {
                    tunnel = tunnel.with_identity(load_identity(path)?);
                }
                if let Some(key) = server_key {
                    tunnel = tunnel.with_server_key(key.clone());
                }
                tunnel.connect()
            }
        }
    }
}

fn load_identity(path: &Path) -> ClientResult<IdentityKey> {
    IdentityKey::load(path).map_err(|e| {
        ClientError::Config(format!("cannot load identity {}: {}", path.display(), e))
    })
}

/// Runs `command` with `args` using this process's stdio. Returns the remote
/// exit code.
pub fn run(options: &ConnectOptions, command: &str, args: &[String]) -> ClientResult<i32> {
    let tunnel = options.connect()?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(command.to_string());
    argv.extend(args.iter().cloned());
    debug!(command, args = args.len(), "running remote command");
    run_command(tunnel, &argv, SessionIo::inherit(options.ping_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSettings, SocketSettings};

    fn args() -> ConnectionArgs {
        ConnectionArgs::default()
    }

    #[test]
    fn no_endpoint_is_config_error() {
        let err = ConnectOptions::resolve(&args(), &ClientConfig::default()).unwrap_err();
        assert!(matches!(err, ClientError::Config(ref msg) if msg.contains("--url")));
    }

    #[test]
    fn flags_override_config() {
        let config = ClientConfig {
            connection: ConnectionSettings {
                url: Some("http://configured:8080/".to_string()),
                auth: Some("Bearer configured".to_string()),
                ping_interval_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut args = args();
        args.url = Some(Url::parse("http://flag:9090/").unwrap());
        args.block_upload = true;
        args.timeout = Some(2);

        let options = ConnectOptions::resolve(&args, &config).unwrap();
        assert_eq!(options.timeout, Duration::from_secs(2));
        assert_eq!(options.ping_interval, Duration::from_millis(250));
        assert_eq!(
            options.endpoint,
            Endpoint::Http {
                url: Url::parse("http://flag:9090/").unwrap(),
                authorization: Some("Bearer configured".to_string()),
                upload_mode: UploadMode::Block,
                follow_redirects: true,
                check_certificates: true,
            }
        );
    }

    #[test]
    fn certificate_check_can_be_disabled() {
        let mut config = ClientConfig::default();
        config.connection.url = Some("https://self-signed.example.org/".to_string());
        let check = |args: &ConnectionArgs, config: &ClientConfig| {
            match ConnectOptions::resolve(args, config).unwrap().endpoint {
                Endpoint::Http {
                    check_certificates, ..
                } => check_certificates,
                other => panic!("unexpected endpoint: {other:?}"),
            }
        };

        assert!(check(&args(), &config));

        let mut flagged = args();
        flagged.no_certificate_check = true;
        assert!(!check(&flagged, &config));

        config.connection.insecure = true;
        assert!(!check(&args(), &config));
    }

    #[test]
    fn configured_socket_used_without_url() {
        let config = ClientConfig {
            connection: ConnectionSettings::default(),
            socket: SocketSettings {
                address: Some("ci.example.org:5005".to_string()),
                identity: None,
                server_key: Some("AAAA".to_string()),
            },
            ..Default::default()
        };
        let options = ConnectOptions::resolve(&args(), &config).unwrap();
        assert_eq!(
            options.endpoint,
            Endpoint::Socket {
                address: "ci.example.org:5005".to_string(),
                identity: None,
                server_key: Some("AAAA".to_string()),
            }
        );

        let mut args = args();
        args.url = Some(Url::parse("http://flag/").unwrap());
        let options = ConnectOptions::resolve(&args, &config).unwrap();
        assert!(matches!(options.endpoint, Endpoint::Http { .. }));
    }

    #[test]
    fn invalid_configured_url_is_config_error() {
        let config = ClientConfig {
            connection: ConnectionSettings {
                url: Some("not a url".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = ConnectOptions::resolve(&args(), &config).unwrap_err();
        assert!(matches!(err, ClientError::Config(ref msg) if msg.contains("invalid url")));
    }
}
