//! Client error types.

use std::fmt;

use tunnelcli_protocol::{FrameError, HandshakeError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Exit status when the URL does not serve the duplex tunnel.
pub const EXIT_NO_ENDPOINT: u8 = 3;

/// Exit status for every other client-side failure.
pub const EXIT_FAILURE: u8 = 255;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// Connection to server failed.
    Connection(String),
    /// The URL answered but does not speak the duplex tunnel.
    NoDuplexEndpoint(String),
    /// The frame stream broke mid-session.
    Protocol(FrameError),
    /// Socket handshake failed.
    Handshake(HandshakeError),
    /// The embedded server failed.
    Server(tunnelcli_server::ServerError),
}

impl ClientError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NoDuplexEndpoint(_) => EXIT_NO_ENDPOINT,
            _ => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::NoDuplexEndpoint(url) => write!(f, "no duplex endpoint found at {}", url),
            Self::Protocol(err) => write!(f, "protocol error: {}", err),
            Self::Handshake(err) => write!(f, "handshake failed: {}", err),
            Self::Server(err) => write!(f, "server error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Protocol(err) => Some(err),
            Self::Handshake(err) => Some(err),
            Self::Server(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err)
    }
}

impl From<HandshakeError> for ClientError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}

impl From<tunnelcli_server::ServerError> for ClientError {
    fn from(err: tunnelcli_server::ServerError) -> Self {
        Self::Server(err)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_has_its_own_exit_code() {
        let err = ClientError::NoDuplexEndpoint("http://localhost:9/".to_string());
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "no duplex endpoint found at http://localhost:9/"
        );
        assert_eq!(ClientError::Config("x".into()).exit_code(), 255);
    }
}
