//! Protocol error types.

use std::io;

use thiserror::Error;
use tunnelcli_core::DiagnosedStreamCorruption;

use crate::op::Op;

/// Result type for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors that end a frame reader loop.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream desynchronized; carries the bytes around the failure.
    #[error(transparent)]
    Corrupt(#[from] Box<DiagnosedStreamCorruption>),

    /// A handler failed while processing a frame.
    #[error("failed to handle {op:?} frame: {source}")]
    Handler {
        op: Op,
        #[source]
        source: io::Error,
    },
}

impl FrameError {
    /// Returns the diagnosis if this is a corruption fault.
    pub fn diagnosis(&self) -> Option<&DiagnosedStreamCorruption> {
        match self {
            Self::Corrupt(d) => Some(d),
            Self::Handler { .. } => None,
        }
    }
}

/// Result type for handshake operations.
pub type HandshakeResult<T> = Result<T, HandshakeError>;

/// Errors raised while agreeing on a secret or proving identities.
///
/// All of them are fatal to the connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// IO error while exchanging handshake values.
    #[error("IO error during handshake: {0}")]
    Io(#[from] io::Error),

    /// Key agreement could not be completed.
    #[error("key agreement failed")]
    Agreement,

    /// The peer claimed an algorithm we do not support.
    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A key file could not be parsed.
    #[error("rejected key: {0}")]
    KeyRejected(String),

    /// Signing failed.
    #[error("failed to sign identity proof")]
    Signing,

    /// The identity proof did not verify.
    #[error("identity proof does not verify for {algorithm} key {fingerprint}")]
    SignatureMismatch {
        algorithm: String,
        fingerprint: String,
    },

    /// A handshake value was not valid.
    #[error("malformed handshake value: {0}")]
    Malformed(String),

    /// The peer is not the one we expected, or refused us.
    #[error("peer rejected: {0}")]
    Rejected(String),
}

impl HandshakeError {
    /// Creates a malformed-value error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}
