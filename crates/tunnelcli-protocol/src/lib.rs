//! Wire protocol for running CLI commands over a duplex byte stream.
//!
//! A connection carries opcode frames in both directions. The client sends
//! arguments, locale, encoding, START and stdin; the server streams stdout
//! and stderr back and finishes with an exit code. Socket connections first
//! run the [`handshake`].

pub mod error;
pub mod framing;
pub mod handshake;
pub mod op;
pub mod side;
pub mod tunnel;
pub mod wire;

pub use error::{FrameError, FrameResult, HandshakeError, HandshakeResult};
pub use framing::{FrameHandler, FrameReader, FramedOutput, Output};
pub use handshake::{IdentityKey, KeyAlgorithm, PeerIdentity, SharedSecret};
pub use op::Op;
pub use side::{
    ClientDispatch, ClientHandler, ClientSide, EitherSide, FrameStream, ServerDispatch,
    ServerHandler, ServerSide,
};

/// Default locale sent by clients that cannot determine one.
pub const DEFAULT_LOCALE: &str = "en_US";

/// Default client encoding.
pub const DEFAULT_ENCODING: &str = "UTF-8";
