//! Drives one command over a connected [`Tunnel`].
//!
//! The main thread sends the command and waits on a [`Completion`]. A reader
//! thread prints server output, a stdin pump forwards local input, and a ping
//! thread keeps idle proxies from closing the tunnel.

use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, trace, warn};
use tunnelcli_protocol::{
    ClientDispatch, ClientHandler, ClientSide, DEFAULT_ENCODING, DEFAULT_LOCALE, FrameReader,
    FramedOutput,
};

use crate::error::{ClientError, ClientResult};
use crate::transport::Tunnel;

/// Exit code reported when the server went away without sending one.
pub const NO_EXIT_CODE: i32 = -1;

/// Largest stdin chunk forwarded in one frame.
const STDIN_CHUNK: usize = 60_000;

#[derive(Default)]
struct CompletionState {
    complete: bool,
    exit: Option<i32>,
}

/// Shared "session finished" flag that helper threads wait on.
#[derive(Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the session complete. The first exit code reported wins.
    pub fn finish(&self, exit: Option<i32>) {
        let mut state = self.lock();
        state.complete = true;
        if state.exit.is_none() {
            state.exit = exit;
        }
        self.done.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Blocks until the session completes and returns its exit code.
    pub fn wait(&self) -> Option<i32> {
        let state = self
            .done
            .wait_while(self.lock(), |state| !state.complete)
            .unwrap_or_else(PoisonError::into_inner);
        state.exit
    }

    /// Waits up to `timeout`; returns true if the session completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (state, _) = self
            .done
            .wait_timeout_while(self.lock(), timeout, |state| !state.complete)
            .unwrap_or_else(PoisonError::into_inner);
        state.complete
    }
}

/// Locale and encoding reported to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLocale {
    pub locale: String,
    pub encoding: String,
}

impl ClientLocale {
    /// Reads `LC_ALL`, `LC_MESSAGES` then `LANG`.
    pub fn from_env() -> Self {
        let value = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty());
        Self::parse(value.as_deref())
    }

    /// Splits a POSIX locale such as `de_DE.ISO-8859-1@euro`.
    pub fn parse(value: Option<&str>) -> Self {
        let value = value.unwrap_or_default();
        let without_modifier = value.split('@').next().unwrap_or_default();
        let (name, codeset) = match without_modifier.split_once('.') {
            Some((name, codeset)) => (name, Some(codeset)),
            None => (without_modifier, None),
        };
        let locale = match name {
            "" | "C" | "POSIX" => DEFAULT_LOCALE.to_string(),
            name => name.to_string(),
        };
        let encoding = match codeset {
            Some(codeset) if !codeset.is_empty() => codeset.to_ascii_uppercase(),
            _ => DEFAULT_ENCODING.to_string(),
        };
        Self { locale, encoding }
    }
}

impl Default for ClientLocale {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }
}

/// Local streams and settings for one command.
pub struct SessionIo {
    pub stdin: Box<dyn Read + Send>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
    pub locale: ClientLocale,
    pub ping_interval: Duration,
}

impl SessionIo {
    /// The process's own stdio and locale.
    pub fn inherit(ping_interval: Duration) -> Self {
        Self {
            stdin: Box::new(io::stdin()),
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
            locale: ClientLocale::from_env(),
            ping_interval,
        }
    }
}

/// Prints server output and records completion.
struct Printer {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
    completion: Arc<Completion>,
}

impl ClientHandler for Printer {
    fn on_exit(&mut self, code: i32) {
        debug!(code, "server reported exit code");
        self.completion.finish(Some(code));
    }

    fn on_stdout(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        self.stdout.write_all(&chunk)?;
        self.stdout.flush()
    }

    fn on_stderr(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        self.stderr.write_all(&chunk)?;
        self.stderr.flush()
    }

    fn on_close(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
        self.completion.finish(None);
    }
}

/// Runs `args` (command name first) on the server and returns its exit code.
///
/// A connection that closes without an exit code yields [`NO_EXIT_CODE`];
/// a corrupted stream is an error carrying the diagnosis.
pub fn run_command(tunnel: Tunnel, args: &[String], session: SessionIo) -> ClientResult<i32> {
    let SessionIo {
        stdin,
        stdout,
        stderr,
        locale,
        ping_interval,
    } = session;
    let completion = Completion::new();
    let side = ClientSide::new(FramedOutput::new(tunnel.output));

    for arg in args {
        side.send_arg(arg)?;
    }
    side.send_encoding(&locale.encoding)?;
    side.send_locale(&locale.locale)?;
    side.send_start()?;

    let reader = FrameReader::new(tunnel.input)
        .with_label("cli download")
        .spawn(ClientDispatch(Printer {
            stdout,
            stderr,
            completion: completion.clone(),
        }))?;
    spawn_stdin_pump(side.clone(), stdin, completion.clone())?;
    spawn_ping(side.clone(), locale.encoding, ping_interval, completion.clone())?;

    let exit = completion.wait();
    if let Err(e) = side.close() {
        debug!(error = %e, "failed to close upload side");
    }

    if let Some(code) = exit {
        return Ok(code);
    }
    match reader.join() {
        Ok(Ok(())) => {
            warn!("connection closed before an exit code was received");
            Ok(NO_EXIT_CODE)
        }
        Ok(Err(e)) => {
            if let Some(diagnosis) = e.diagnosis() {
                error!("{}", diagnosis.table_report());
            }
            Err(ClientError::Protocol(e))
        }
        Err(_) => Err(ClientError::Connection("frame reader panicked".to_string())),
    }
}

fn spawn_stdin_pump(
    side: ClientSide,
    stdin: Box<dyn Read + Send>,
    completion: Arc<Completion>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("stdin pump".to_string())
        .spawn(move || {
            if let Err(e) = pump_stdin(&side, stdin, &completion) {
                if !completion.is_complete() {
                    warn!(error = %e, "failed to forward stdin");
                }
            }
        })?;
    Ok(())
}

fn pump_stdin(
    side: &ClientSide,
    mut stdin: Box<dyn Read + Send>,
    completion: &Completion,
) -> io::Result<()> {
    let mut out = side.stdin();
    let mut buf = vec![0u8; STDIN_CHUNK];
    while !completion.is_complete() {
        let n = stdin.read(&mut buf)?;
        if n == 0 {
            break;
        }
        trace!(bytes = n, "forwarding stdin");
        out.write_all(&buf[..n])?;
    }
    side.send_end_stdin()
}

/// Re-sends ENCODING until completion; the server ignores it after START.
fn spawn_ping(
    side: ClientSide,
    encoding: String,
    interval: Duration,
    completion: Arc<Completion>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("ping".to_string())
        .spawn(move || {
            while !completion.wait_timeout(interval) {
                trace!("sending ping");
                if let Err(e) = side.send_encoding(&encoding) {
                    if !completion.is_complete() {
                        warn!(error = %e, "failed to send ping");
                    }
                    return;
                }
            }
        })?;
    Ok(())
}
