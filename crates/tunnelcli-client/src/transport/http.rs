//! Duplex tunnel over two HTTP exchanges.
//!
//! The download leg is a POST whose response body never ends until the
//! session does; the upload leg is a POST whose chunked request body stays
//! open for the same time. Both carry the same random session token.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};
use tunnelcli_core::{BlockChainedWriter, DEFAULT_BLOCK_SIZE, PipeWriter, pipe};
use tunnelcli_protocol::tunnel::{
    CLI_PATH, DUPLEX_HEADER, ERROR_HEADER, INITIAL_BYTE, SESSION_HEADER, SIDE_HEADER, Side,
};
use url::Url;
use uuid::Uuid;

use super::Tunnel;
use super::block::BlockUpload;
use crate::config::UploadMode;
use crate::error::{ClientError, ClientResult};

/// Opens duplex tunnels against `<base>/cli`.
pub struct HttpTunnel {
    client: Client,
    base: Url,
    authorization: Option<String>,
    upload_mode: UploadMode,
    follow_redirects: bool,
    check_certificates: bool,
}

impl HttpTunnel {
    /// Creates a tunnel factory for the server at `base`.
    ///
    /// `connect_timeout` bounds connection setup only; the legs themselves
    /// stay open for as long as the command runs.
    pub fn new(base: Url, connect_timeout: Duration) -> ClientResult<Self> {
        Self::build(base, connect_timeout, true)
    }

    /// Like [`HttpTunnel::new`], but accepts any TLS certificate and host
    /// name the server presents.
    pub fn without_certificate_check(base: Url, connect_timeout: Duration) -> ClientResult<Self> {
        warn!(url = %base, "TLS certificate checking is disabled");
        Self::build(base, connect_timeout, false)
    }

    fn build(base: Url, connect_timeout: Duration, check_certificates: bool) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(None)
            .user_agent(concat!("tunnelcli/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!check_certificates)
            .build()?;
        Ok(Self {
            client,
            base,
            authorization: None,
            upload_mode: UploadMode::Streaming,
            follow_redirects: true,
            check_certificates,
        })
    }

    pub fn checks_certificates(&self) -> bool {
        self.check_certificates
    }

    /// Builder: send this `Authorization` value on every request.
    pub fn with_authorization(mut self, value: Option<String>) -> Self {
        self.authorization = value;
        self
    }

    pub fn with_upload_mode(mut self, mode: UploadMode) -> Self {
        self.upload_mode = mode;
        self
    }

    /// Builder: enable or disable the redirect check.
    pub fn with_redirect_check(mut self, enabled: bool) -> Self {
        self.follow_redirects = enabled;
        self
    }

    /// Follows redirects on the base URL with a GET.
    ///
    /// Best effort: any failure keeps the configured URL.
    pub fn resolve_base(&self) -> Url {
        if !self.follow_redirects {
            return self.base.clone();
        }
        let request = authorized(self.client.get(self.base.clone()), &self.authorization);
        match request.send() {
            Ok(response) => {
                let resolved = response.url().clone();
                if resolved != self.base {
                    debug!(from = %self.base, to = %resolved, "following redirect");
                }
                resolved
            }
            Err(e) => {
                debug!(url = %self.base, error = %e, "redirect check failed");
                self.base.clone()
            }
        }
    }

    /// Opens both legs of a new session.
    pub fn connect(&self) -> ClientResult<Tunnel> {
        let url = cli_url(&self.resolve_base())?;
        let leg = Leg {
            client: self.client.clone(),
            url,
            session: Uuid::new_v4(),
            authorization: self.authorization.clone(),
        };
        debug!(url = %leg.url, session = %leg.session, mode = ?self.upload_mode, "opening duplex tunnel");

        let mut download = leg
            .request(Side::Download)
            .body(Vec::new())
            .send()
            .map_err(|e| ClientError::Connection(format!("failed to connect to {}: {}", leg.url, e)))?;
        check_leg(&download, &leg.url, Side::Download)?;

        let mut first = [0u8; 1];
        download.read_exact(&mut first)?;
        if first[0] != INITIAL_BYTE {
            return Err(ClientError::Connection(
                "expected to see initial zero byte; perhaps the server does not support the duplex tunnel?"
                    .to_string(),
            ));
        }

        let output: Box<dyn Write + Send> = match self.upload_mode {
            UploadMode::Streaming => Box::new(stream_upload(leg)?),
            UploadMode::Block => Box::new(BlockChainedWriter::new(
                BlockUpload::new(leg),
                DEFAULT_BLOCK_SIZE,
            )),
        };
        Ok(Tunnel {
            input: Box::new(download),
            output,
        })
    }
}

/// Request template for one leg of a session.
#[derive(Clone)]
pub(crate) struct Leg {
    client: Client,
    url: Url,
    session: Uuid,
    authorization: Option<String>,
}

impl Leg {
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn request(&self, side: Side) -> RequestBuilder {
        let request = self
            .client
            .post(self.url.clone())
            .header(SESSION_HEADER, self.session.to_string())
            .header(SIDE_HEADER, side.as_str());
        let request = match side {
            Side::Download => request,
            Side::Upload | Side::UploadBlock => {
                request.header(CONTENT_TYPE, "application/octet-stream")
            }
        };
        authorized(request, &self.authorization)
    }
}

fn authorized(request: RequestBuilder, authorization: &Option<String>) -> RequestBuilder {
    match authorization {
        Some(value) => request.header(AUTHORIZATION, value),
        None => request,
    }
}

/// Starts the chunked upload leg on its own thread; bytes written to the
/// returned pipe become the request body.
fn stream_upload(leg: Leg) -> ClientResult<PipeWriter> {
    let (writer, reader) = pipe();
    let request = leg.request(Side::Upload).body(Body::new(reader));
    thread::Builder::new()
        .name("http upload".to_string())
        .spawn(move || match request.send() {
            Ok(response) => match check_leg(&response, &leg.url, Side::Upload) {
                Ok(()) => debug!(session = %leg.session, "upload leg finished"),
                Err(e) => warn!(error = %e, "upload leg rejected"),
            },
            Err(e) => warn!(error = %e, "upload leg failed"),
        })?;
    Ok(writer)
}

/// `<base>/cli`, keeping any path prefix of `base`.
pub(crate) fn cli_url(base: &Url) -> ClientResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(CLI_PATH)
        .map_err(|e| ClientError::Config(format!("invalid server URL {}: {}", base, e)))
}

/// Accepts a leg response only from a server speaking the duplex tunnel.
pub(crate) fn check_leg(response: &Response, url: &Url, side: Side) -> ClientResult<()> {
    if let Some(reason) = response
        .headers()
        .get(ERROR_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        return Err(ClientError::Connection(format!(
            "server refused the {} leg ({}): {}",
            side,
            response.status(),
            reason
        )));
    }
    if !response.headers().contains_key(DUPLEX_HEADER) {
        return Err(ClientError::NoDuplexEndpoint(url.to_string()));
    }
    if !response.status().is_success() {
        return Err(ClientError::Connection(format!(
            "{} leg failed with {}",
            side,
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_url_keeps_path_prefix() {
        let url = |base: &str| cli_url(&Url::parse(base).unwrap()).unwrap().to_string();
        assert_eq!(url("http://localhost:8080"), "http://localhost:8080/cli");
        assert_eq!(url("http://localhost:8080/"), "http://localhost:8080/cli");
        assert_eq!(url("https://ci.example.org/jenkins"), "https://ci.example.org/jenkins/cli");
        assert_eq!(url("https://ci.example.org/jenkins/"), "https://ci.example.org/jenkins/cli");
    }

    #[test]
    fn unreachable_redirect_check_keeps_base() {
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let tunnel = HttpTunnel::new(base.clone(), Duration::from_millis(200)).unwrap();
        assert_eq!(tunnel.resolve_base(), base);
        let tunnel = tunnel.with_redirect_check(false);
        assert_eq!(tunnel.resolve_base(), base);
    }

    #[test]
    fn certificate_check_is_on_unless_disabled() {
        let base = Url::parse("https://ci.example.org/").unwrap();
        let tunnel = HttpTunnel::new(base.clone(), Duration::from_secs(1)).unwrap();
        assert!(tunnel.checks_certificates());
        let tunnel = HttpTunnel::without_certificate_check(base, Duration::from_secs(1)).unwrap();
        assert!(!tunnel.checks_certificates());
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let tunnel = HttpTunnel::new(base, Duration::from_millis(200))
            .unwrap()
            .with_redirect_check(false);
        let err = tunnel.connect().err().unwrap();
        assert!(matches!(err, ClientError::Connection(_)));
    }
}
