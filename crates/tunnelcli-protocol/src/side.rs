//! Client and server ends of the framed CLI protocol.
//!
//! Each end owns a synchronized frame writer ([`EitherSide`]) and receives
//! frames through a [`FrameHandler`] adapter around a typed callback trait.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::framing::{FrameHandler, Output};
use crate::op::Op;
use crate::wire::{read_i32, read_utf, utf_payload};

/// Sending half shared by both ends.
///
/// Cloning is cheap; all clones write to the same output. Each send holds the
/// output lock for the whole frame, so frames from different threads never
/// interleave.
#[derive(Clone)]
pub struct EitherSide {
    out: Arc<Mutex<Box<dyn Output>>>,
}

impl EitherSide {
    /// Creates a side writing to `out`.
    pub fn new(out: impl Output + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    /// Sends a frame with an empty payload.
    pub fn send(&self, op: Op) -> io::Result<()> {
        self.send_bytes(op, &[])
    }

    /// Sends a big-endian `i32` payload.
    pub fn send_int(&self, op: Op, value: i32) -> io::Result<()> {
        self.send_bytes(op, &value.to_be_bytes())
    }

    /// Sends raw bytes as the payload.
    pub fn send_bytes(&self, op: Op, bytes: &[u8]) -> io::Result<()> {
        trace!(%op, len = bytes.len(), "sending frame");
        self.output().send(op, bytes)
    }

    /// Sends a length-prefixed UTF-8 string.
    pub fn send_utf(&self, op: Op, text: &str) -> io::Result<()> {
        self.send_bytes(op, &utf_payload(text)?)
    }

    /// Returns a writer that sends each write as one `op` frame.
    pub fn stream(&self, op: Op) -> FrameStream {
        FrameStream {
            side: self.clone(),
            op,
        }
    }

    /// Closes the output. Never emits a partial frame.
    pub fn close(&self) -> io::Result<()> {
        self.output().close()
    }

    fn output(&self) -> MutexGuard<'_, Box<dyn Output>> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writer view over one stream operation of an [`EitherSide`].
#[derive(Clone)]
pub struct FrameStream {
    side: EitherSide,
    op: Op,
}

impl FrameStream {
    /// The operation each write is sent as.
    pub fn op(&self) -> Op {
        self.op
    }
}

impl Write for FrameStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.side.send_bytes(self.op, buf)?;
        Ok(buf.len())
    }

    /// Frames are flushed as they are sent.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server end: receives the command, streams output, reports the exit code.
#[derive(Clone)]
pub struct ServerSide {
    side: EitherSide,
}

impl ServerSide {
    /// Creates a server end writing to `out`.
    pub fn new(out: impl Output + 'static) -> Self {
        Self {
            side: EitherSide::new(out),
        }
    }

    /// Reports the command's exit code. Sent once, after all output.
    pub fn send_exit(&self, code: i32) -> io::Result<()> {
        self.side.send_int(Op::Exit, code)
    }

    /// Writer whose bytes arrive as `STDOUT` frames.
    pub fn stdout(&self) -> FrameStream {
        self.side.stream(Op::Stdout)
    }

    /// Writer whose bytes arrive as `STDERR` frames.
    pub fn stderr(&self) -> FrameStream {
        self.side.stream(Op::Stderr)
    }

    /// Closes the connection for writing.
    pub fn close(&self) -> io::Result<()> {
        self.side.close()
    }
}

/// Client end: sends the command and stdin, receives output.
#[derive(Clone)]
pub struct ClientSide {
    side: EitherSide,
}

impl ClientSide {
    /// Creates a client end writing to `out`.
    pub fn new(out: impl Output + 'static) -> Self {
        Self {
            side: EitherSide::new(out),
        }
    }

    /// Sends one argument. The first one names the command.
    pub fn send_arg(&self, text: &str) -> io::Result<()> {
        self.side.send_utf(Op::Arg, text)
    }

    /// Sends the locale, e.g. `en_US`.
    pub fn send_locale(&self, text: &str) -> io::Result<()> {
        self.side.send_utf(Op::Locale, text)
    }

    /// Sends the character encoding of the terminal.
    pub fn send_encoding(&self, text: &str) -> io::Result<()> {
        self.side.send_utf(Op::Encoding, text)
    }

    /// Ends the preamble. The server starts the command on receipt.
    pub fn send_start(&self) -> io::Result<()> {
        self.side.send(Op::Start)
    }

    /// Writer whose bytes arrive as `STDIN` frames.
    pub fn stdin(&self) -> FrameStream {
        self.side.stream(Op::Stdin)
    }

    /// Signals end of input.
    pub fn send_end_stdin(&self) -> io::Result<()> {
        self.side.send(Op::EndStdin)
    }

    /// Closes the connection for writing.
    pub fn close(&self) -> io::Result<()> {
        self.side.close()
    }
}

/// Callbacks for frames arriving at the server.
pub trait ServerHandler {
    fn on_arg(&mut self, arg: String);
    fn on_locale(&mut self, locale: String);
    fn on_encoding(&mut self, encoding: String);
    fn on_start(&mut self);
    fn on_stdin(&mut self, chunk: Vec<u8>) -> io::Result<()>;
    fn on_end_stdin(&mut self) -> io::Result<()>;

    /// The client side of the connection went away.
    fn on_close(&mut self) {}
}

/// Callbacks for frames arriving at the client.
pub trait ClientHandler {
    fn on_exit(&mut self, code: i32);
    fn on_stdout(&mut self, chunk: Vec<u8>) -> io::Result<()>;
    fn on_stderr(&mut self, chunk: Vec<u8>) -> io::Result<()>;

    /// The server side of the connection went away.
    fn on_close(&mut self) {}
}

/// Routes client-originated frames to a [`ServerHandler`].
pub struct ServerDispatch<H>(pub H);

impl<H: ServerHandler> FrameHandler for ServerDispatch<H> {
    fn handle(&mut self, op: Op, payload: &mut dyn Read) -> io::Result<bool> {
        match op {
            Op::Arg => self.0.on_arg(read_utf(payload)?),
            Op::Locale => self.0.on_locale(read_utf(payload)?),
            Op::Encoding => self.0.on_encoding(read_utf(payload)?),
            Op::Start => self.0.on_start(),
            Op::Stdin => self.0.on_stdin(read_all(payload)?)?,
            Op::EndStdin => self.0.on_end_stdin()?,
            Op::Exit | Op::Stdout | Op::Stderr => return Ok(false),
        }
        Ok(true)
    }

    fn handle_close(&mut self) {
        self.0.on_close();
    }
}

/// Routes server-originated frames to a [`ClientHandler`].
pub struct ClientDispatch<H>(pub H);

impl<H: ClientHandler> FrameHandler for ClientDispatch<H> {
    fn handle(&mut self, op: Op, payload: &mut dyn Read) -> io::Result<bool> {
        match op {
            Op::Exit => self.0.on_exit(read_i32(payload)?),
            Op::Stdout => self.0.on_stdout(read_all(payload)?)?,
            Op::Stderr => self.0.on_stderr(read_all(payload)?)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn handle_close(&mut self) {
        self.0.on_close();
    }
}

fn read_all(payload: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::new();
    payload.read_to_end(&mut chunk)?;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    use tunnelcli_core::pipe;

    use crate::framing::{FrameReader, FramedOutput};

    #[derive(Debug, PartialEq)]
    enum Event {
        Arg(String),
        Locale(String),
        Encoding(String),
        Start,
        Stdin(Vec<u8>),
        EndStdin,
        Closed,
    }

    /// Records everything and, on START, runs a scripted build.
    struct ScriptedServer {
        events: mpsc::Sender<Event>,
        side: ServerSide,
    }

    impl ServerHandler for ScriptedServer {
        fn on_arg(&mut self, arg: String) {
            let _ = self.events.send(Event::Arg(arg));
        }
        fn on_locale(&mut self, locale: String) {
            let _ = self.events.send(Event::Locale(locale));
        }
        fn on_encoding(&mut self, encoding: String) {
            let _ = self.events.send(Event::Encoding(encoding));
        }
        fn on_start(&mut self) {
            let _ = self.events.send(Event::Start);
            let mut stdout = self.side.stdout();
            stdout.write_all(b"Building...\n").unwrap();
            stdout.write_all(b"Done\n").unwrap();
            self.side.send_exit(0).unwrap();
            self.side.close().unwrap();
        }
        fn on_stdin(&mut self, chunk: Vec<u8>) -> io::Result<()> {
            let _ = self.events.send(Event::Stdin(chunk));
            Ok(())
        }
        fn on_end_stdin(&mut self) -> io::Result<()> {
            let _ = self.events.send(Event::EndStdin);
            Ok(())
        }
        fn on_close(&mut self) {
            let _ = self.events.send(Event::Closed);
        }
    }

    #[derive(Default)]
    struct Collected {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit: Option<i32>,
        closed: bool,
    }

    impl ClientHandler for Collected {
        fn on_exit(&mut self, code: i32) {
            self.exit = Some(code);
        }
        fn on_stdout(&mut self, chunk: Vec<u8>) -> io::Result<()> {
            self.stdout.extend(chunk);
            Ok(())
        }
        fn on_stderr(&mut self, chunk: Vec<u8>) -> io::Result<()> {
            self.stderr.extend(chunk);
            Ok(())
        }
        fn on_close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn build_job_end_to_end() {
        let (to_server, server_in) = pipe();
        let (to_client, client_in) = pipe();
        let (events_tx, events_rx) = mpsc::channel();

        let server = ServerSide::new(FramedOutput::new(to_client));
        let server_thread = FrameReader::new(server_in)
            .with_label("server reader")
            .spawn(ServerDispatch(ScriptedServer {
                events: events_tx,
                side: server,
            }))
            .unwrap();

        let client_thread = thread::spawn(move || {
            let mut dispatch = ClientDispatch(Collected::default());
            FrameReader::new(client_in).run(&mut dispatch).unwrap();
            dispatch.0
        });

        let client = ClientSide::new(FramedOutput::new(to_server));
        client.send_arg("build").unwrap();
        client.send_arg("myjob").unwrap();
        client.send_locale("en_US").unwrap();
        client.send_encoding("UTF-8").unwrap();
        client.stdin().write_all(b"").unwrap();
        client.send_start().unwrap();

        let collected = client_thread.join().unwrap();
        assert_eq!(collected.stdout, b"Building...\nDone\n");
        assert!(collected.stderr.is_empty());
        assert_eq!(collected.exit, Some(0));
        assert!(collected.closed);

        client.send_end_stdin().unwrap();
        client.close().unwrap();
        server_thread.join().unwrap().unwrap();

        let events: Vec<Event> = events_rx.iter().collect();
        assert_eq!(
            events,
            vec![
                Event::Arg("build".into()),
                Event::Arg("myjob".into()),
                Event::Locale("en_US".into()),
                Event::Encoding("UTF-8".into()),
                Event::Start,
                Event::EndStdin,
                Event::Closed,
            ]
        );
    }

    #[test]
    fn stdin_stream_frames_each_write() {
        let (to_server, server_in) = pipe();
        let (events_tx, events_rx) = mpsc::channel();
        let (sink, _unused) = pipe();

        let reader = FrameReader::new(server_in)
            .spawn(ServerDispatch(ScriptedServer {
                events: events_tx,
                side: ServerSide::new(FramedOutput::new(sink)),
            }))
            .unwrap();

        let client = ClientSide::new(FramedOutput::new(to_server));
        let mut stdin = client.stdin();
        assert_eq!(stdin.op(), Op::Stdin);
        stdin.write_all(b"line 1\n").unwrap();
        stdin.write_all(b"line 2\n").unwrap();
        client.send_end_stdin().unwrap();
        client.close().unwrap();
        reader.join().unwrap().unwrap();

        let events: Vec<Event> = events_rx.iter().collect();
        assert_eq!(
            events,
            vec![
                Event::Stdin(b"line 1\n".to_vec()),
                Event::Stdin(b"line 2\n".to_vec()),
                Event::EndStdin,
                Event::Closed,
            ]
        );
    }

    #[test]
    fn concurrent_senders_never_interleave_frames() {
        let (to_client, client_in) = pipe();
        let server = ServerSide::new(FramedOutput::new(to_client));

        let reader = thread::spawn(move || {
            let mut dispatch = ClientDispatch(Collected::default());
            FrameReader::new(client_in).run(&mut dispatch).unwrap();
            dispatch.0
        });

        let writers: Vec<_> = (0..4u8)
            .map(|n| {
                let server = server.clone();
                thread::spawn(move || {
                    let mut out = if n % 2 == 0 { server.stdout() } else { server.stderr() };
                    for _ in 0..100 {
                        out.write_all(&[b'a' + n; 33]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        server.send_exit(4).unwrap();
        server.close().unwrap();

        let collected = reader.join().unwrap();
        assert_eq!(collected.exit, Some(4));
        assert_eq!(collected.stdout.len(), 2 * 100 * 33);
        assert_eq!(collected.stderr.len(), 2 * 100 * 33);
        for chunk in collected.stdout.chunks(33) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }

    #[test]
    fn send_after_close_fails() {
        let (sink, _reader) = pipe();
        let client = ClientSide::new(FramedOutput::new(sink));
        client.close().unwrap();
        let err = client.send_start().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
