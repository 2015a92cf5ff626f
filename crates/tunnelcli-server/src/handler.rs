//! Runs one command session over a framed connection.
//!
//! The session reader collects arguments, locale and encoding until START,
//! then the command runs with stdin fed from STDIN frames and its output
//! framed back to the client.

use std::io::{self, BufWriter, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use tunnelcli_core::{PipeWriter, pipe};
use tunnelcli_protocol::{
    DEFAULT_ENCODING, DEFAULT_LOCALE, FrameReader, ServerDispatch, ServerHandler, ServerSide,
};

use crate::error::ServerResult;
use crate::registry::{CommandContext, CommandRegistry};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client never sent START or closed the connection in time.
    TimedOut,
    /// An exit code was sent to the client.
    Exited(i32),
}

#[derive(Default)]
struct Pending {
    args: Vec<String>,
    locale: Option<String>,
    encoding: Option<String>,
    started: bool,
    ready: bool,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_ready(&self) {
        self.lock().ready = true;
        self.ready.notify_all();
    }
}

/// Frame callbacks of a server session.
struct SessionFrames {
    shared: Arc<Shared>,
    stdin: PipeWriter,
}

impl ServerHandler for SessionFrames {
    fn on_arg(&mut self, arg: String) {
        let mut pending = self.shared.lock();
        if pending.started {
            warn!(%arg, "ignoring argument sent after START");
            return;
        }
        pending.args.push(arg);
    }

    fn on_locale(&mut self, locale: String) {
        if is_known_locale(&locale) {
            self.shared.lock().locale = Some(locale);
        } else {
            warn!(%locale, "unknown client locale");
        }
    }

    fn on_encoding(&mut self, encoding: String) {
        let mut pending = self.shared.lock();
        if pending.started {
            trace!("keepalive");
        } else if is_known_encoding(&encoding) {
            pending.encoding = Some(encoding);
        } else {
            warn!(%encoding, "unknown client encoding");
        }
    }

    fn on_start(&mut self) {
        self.shared.lock().started = true;
        self.shared.mark_ready();
    }

    fn on_stdin(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        if let Err(e) = self.stdin.write_all(&chunk) {
            debug!(error = %e, bytes = chunk.len(), "command stopped reading stdin, dropping input");
        }
        Ok(())
    }

    fn on_end_stdin(&mut self) -> io::Result<()> {
        self.stdin.close();
        Ok(())
    }

    fn on_close(&mut self) {
        self.stdin.close();
        self.shared.mark_ready();
    }
}

/// Runs commands from a [`CommandRegistry`] for framed connections.
#[derive(Clone)]
pub struct SessionRunner {
    registry: Arc<CommandRegistry>,
    start_timeout: Duration,
}

impl SessionRunner {
    pub fn new(registry: Arc<CommandRegistry>, start_timeout: Duration) -> Self {
        Self {
            registry,
            start_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Serves one session: `input` carries client frames, `server` writes
    /// frames back. Blocks until the command finished.
    ///
    /// The frame reader keeps running on its own thread until the client
    /// closes its side.
    pub fn run<R>(&self, input: R, server: ServerSide, label: &str) -> ServerResult<SessionOutcome>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (stdin_tx, stdin_rx) = pipe();
        let frames = SessionFrames {
            shared: shared.clone(),
            stdin: stdin_tx,
        };
        let reader = FrameReader::new(input).with_label(format!("{label} reader"));
        thread::Builder::new()
            .name(format!("{label} reader"))
            .spawn(move || {
                if let Err(e) = reader.run(&mut ServerDispatch(frames)) {
                    warn!(error = %e, "CLI connection failed");
                }
            })?;

        let (args, locale, encoding) = {
            let guard = shared.lock();
            let (pending, _) = shared
                .ready
                .wait_timeout_while(guard, self.start_timeout, |p| !p.ready)
                .unwrap_or_else(PoisonError::into_inner);
            if !pending.ready {
                debug!(label, "timed out waiting for the client to start");
                drop(pending);
                server.close()?;
                return Ok(SessionOutcome::TimedOut);
            }
            (
                pending.args.clone(),
                pending.locale.clone(),
                pending.encoding.clone(),
            )
        };

        let mut stderr = server.stderr();
        let Some((name, rest)) = args.split_first() else {
            writeln!(stderr, "Connection closed before arguments received")?;
            return finish(&server, 2);
        };
        let Some(command) = self.registry.get(name) else {
            writeln!(stderr, "No such command {name}")?;
            return finish(&server, 2);
        };

        let mut ctx = CommandContext {
            locale: locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            encoding: encoding.unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
            stdin: Box::new(stdin_rx),
            stdout: Box::new(BufWriter::new(server.stdout())),
            stderr: Box::new(stderr),
            registry: self.registry.clone(),
        };
        info!(command = %name, args = rest.len(), "running command");
        let code = command.main(rest, &mut ctx);
        ctx.stdout.flush()?;
        drop(ctx);
        debug!(command = %name, code, "command finished");
        finish(&server, code)
    }
}

fn finish(server: &ServerSide, code: i32) -> ServerResult<SessionOutcome> {
    server.send_exit(code)?;
    server.close()?;
    Ok(SessionOutcome::Exited(code))
}

/// Accepts `ll`, `ll_CC` and `ll_CC_variant`, optionally followed by
/// `.codeset` or `@modifier`.
fn is_known_locale(locale: &str) -> bool {
    let base = locale.split(['.', '@']).next().unwrap_or_default();
    let mut parts = base.split('_');
    let language_ok = parts.next().is_some_and(|lang| {
        (2..=3).contains(&lang.len()) && lang.bytes().all(|b| b.is_ascii_lowercase())
    });
    let country_ok = parts.next().is_none_or(|country| {
        (country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase()))
            || (country.len() == 3 && country.bytes().all(|b| b.is_ascii_digit()))
    });
    let variant_ok = parts.next().is_none_or(|variant| !variant.is_empty());
    language_ok && country_ok && variant_ok && parts.next().is_none()
}

const KNOWN_ENCODINGS: &[&str] = &[
    "UTF-8",
    "UTF8",
    "US-ASCII",
    "ASCII",
    "ISO-8859-1",
    "ISO8859-1",
    "ISO-8859-15",
    "LATIN1",
    "UTF-16",
    "UTF-16BE",
    "UTF-16LE",
    "WINDOWS-1252",
    "CP1252",
];

fn is_known_encoding(encoding: &str) -> bool {
    KNOWN_ENCODINGS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(encoding))
}
