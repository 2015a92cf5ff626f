//! Flight recorder for input streams.
//!
//! [`FlightRecorder`] wraps a byte source and remembers the last bytes that
//! went through it. When the stream turns out to be corrupt, the recorder can
//! grab whatever the peer sends next and bundle both windows with the error
//! into a [`DiagnosedStreamCorruption`], which shows an operator what preceded
//! and what followed the bad byte.

use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::hexdump;
use crate::ring_buffer::RingBuffer;

/// Default number of bytes kept by a recorder.
pub const DEFAULT_CAPACITY: usize = 1024;

/// How long [`FlightRecorder::analyze_crash`] keeps reading after a failure.
pub const READ_AHEAD_TIMEOUT: Duration = Duration::from_secs(1);

/// Stream corruption explained by the bytes around the failure.
#[derive(Debug, Error)]
pub struct DiagnosedStreamCorruption {
    /// The error that triggered the diagnosis.
    #[source]
    cause: io::Error,
    /// Error hit while reading ahead, if any.
    diagnosis_failure: Option<io::Error>,
    /// Bytes read before the failure, oldest first.
    read_back: Vec<u8>,
    /// Bytes that arrived right after the failure.
    read_ahead: Vec<u8>,
}

impl DiagnosedStreamCorruption {
    /// Creates a diagnosis from its parts.
    pub fn new(
        cause: io::Error,
        diagnosis_failure: Option<io::Error>,
        read_back: Vec<u8>,
        read_ahead: Vec<u8>,
    ) -> Self {
        Self {
            cause,
            diagnosis_failure,
            read_back,
            read_ahead,
        }
    }

    /// Returns the triggering error.
    pub fn cause(&self) -> &io::Error {
        &self.cause
    }

    /// Returns the error hit during read-ahead, if any.
    pub fn diagnosis_failure(&self) -> Option<&io::Error> {
        self.diagnosis_failure.as_ref()
    }

    /// Returns the bytes read before the failure.
    pub fn read_back(&self) -> &[u8] {
        &self.read_back
    }

    /// Returns the bytes captured after the failure.
    pub fn read_ahead(&self) -> &[u8] {
        &self.read_ahead
    }

    /// Renders both windows as offset/hex/ASCII tables for verbose logs.
    pub fn table_report(&self) -> String {
        format!(
            "read back ({} bytes):\n{}read ahead ({} bytes):\n{}",
            self.read_back.len(),
            hexdump::to_table(&self.read_back),
            self.read_ahead.len(),
            hexdump::to_table(&self.read_ahead),
        )
    }
}

impl fmt::Display for DiagnosedStreamCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stream corruption detected: {}", self.cause)?;
        writeln!(f, "Read back: {}", hexdump::to_hex(&self.read_back))?;
        write!(f, "Read ahead: {}", hexdump::to_hex(&self.read_ahead))?;
        if let Some(ref failure) = self.diagnosis_failure {
            write!(f, "\nDiagnosis problem:\n    {failure}")?;
        }
        Ok(())
    }
}

/// Byte source wrapper that records the most recent bytes read.
pub struct FlightRecorder<R> {
    source: R,
    recorder: Mutex<RingBuffer>,
}

impl<R: Read> FlightRecorder<R> {
    /// Wraps `source` with the default capacity.
    pub fn new(source: R) -> Self {
        Self::with_capacity(source, DEFAULT_CAPACITY)
    }

    /// Wraps `source`, keeping the last `capacity` bytes.
    pub fn with_capacity(source: R, capacity: usize) -> Self {
        Self {
            source,
            recorder: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Returns a copy of the recorded bytes, oldest first.
    pub fn record(&self) -> Vec<u8> {
        self.ring().to_vec()
    }

    /// Forgets the recorded bytes. The source is untouched.
    pub fn clear(&self) {
        self.ring().clear();
    }

    /// Skips `n` bytes by reading them, so they still end up in the record.
    ///
    /// Returns the number of bytes actually skipped, which is less than `n`
    /// only if the source hit end of stream.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        io::copy(&mut self.by_ref().take(n), &mut io::sink())
    }

    /// Returns a reference to the wrapped source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// Unwraps the recorder, returning the source.
    pub fn into_inner(self) -> R {
        self.source
    }

    fn ring(&self) -> std::sync::MutexGuard<'_, RingBuffer> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Read + Send + 'static> FlightRecorder<R> {
    /// Builds a diagnosis for `problem` from the recorded bytes plus whatever
    /// the source yields within [`READ_AHEAD_TIMEOUT`].
    ///
    /// The read-ahead runs on its own thread, which checks a stop flag before
    /// every read. A source that never returns keeps that thread parked until
    /// it is closed; the diagnosis does not wait for it.
    pub fn analyze_crash(self, problem: io::Error, label: &str) -> DiagnosedStreamCorruption {
        self.analyze_crash_within(problem, label, READ_AHEAD_TIMEOUT)
    }

    pub(crate) fn analyze_crash_within(
        self,
        problem: io::Error,
        label: &str,
        budget: Duration,
    ) -> DiagnosedStreamCorruption {
        let read_back = self.record();
        let mut source = self.source;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let failure = Arc::new(Mutex::new(None::<io::Error>));
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let spawned = {
            let captured = captured.clone();
            let failure = failure.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("diagnose stream corruption by {label}"))
                .spawn(move || {
                    let mut buf = [0u8; 1024];
                    while !stop.load(Ordering::Acquire) {
                        match source.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                trace!(bytes = n, "read ahead");
                                captured
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .extend_from_slice(&buf[..n]);
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(e) => {
                                *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                                break;
                            }
                        }
                    }
                    let _ = done_tx.send(());
                })
        };

        let diagnosis_failure = match spawned {
            Ok(_) => {
                if done_rx.recv_timeout(budget).is_err() {
                    debug!(label, "read-ahead budget exhausted");
                }
                stop.store(true, Ordering::Release);
                failure.lock().unwrap_or_else(PoisonError::into_inner).take()
            }
            Err(e) => Some(e),
        };

        let read_ahead = captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        DiagnosedStreamCorruption::new(problem, diagnosis_failure, read_back, read_ahead)
    }
}

impl<R: Read> Read for FlightRecorder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read(buf)?;
        if n > 0 {
            self.ring().extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}
