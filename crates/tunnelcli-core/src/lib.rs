//! Core building blocks: tracing setup, stream diagnostics, pipes, socket
//! helpers and block-chained output.

pub mod chained;
pub mod flight_recorder;
pub mod hexdump;
pub mod net;
pub mod pipe;
pub mod ring_buffer;
pub mod tracing;

pub use chained::{BlockChainedWriter, BlockSource, DEFAULT_BLOCK_SIZE};
pub use flight_recorder::{DiagnosedStreamCorruption, FlightRecorder};
pub use net::TcpWriteHalf;
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use ring_buffer::RingBuffer;
pub use self::tracing::{LogFormat, TracingConfig, TracingError, init_tracing};
