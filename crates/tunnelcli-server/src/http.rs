//! Duplex HTTP endpoint pairing the two legs of a CLI session.
//!
//! A client opens a `download` leg whose response body streams server output
//! and an `upload` leg whose request body streams client input. Both carry
//! the same `Session` header. When chunked uploads are not possible the
//! client sends `upload-block` requests instead, one bounded block each.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use ring::constant_time;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tunnelcli_protocol::tunnel::{
    CLI_PATH, DUPLEX_HEADER, ERROR_HEADER, INITIAL_BYTE, SESSION_HEADER, SIDE_HEADER, Side,
};
use tunnelcli_protocol::{FramedOutput, ServerSide};
use uuid::Uuid;

use crate::bridge::{BodyReader, BodyWriter, CHANNEL_DEPTH, forward_body, response_body};
use crate::handler::SessionRunner;

/// Both legs of one tunnel, as seen by the endpoint.
struct DuplexSession {
    upload_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    upload_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    attached: watch::Sender<bool>,
}

impl DuplexSession {
    fn new() -> Self {
        let (upload_tx, upload_rx) = mpsc::channel(CHANNEL_DEPTH);
        Self {
            upload_tx: Mutex::new(Some(upload_tx)),
            upload_rx: Mutex::new(Some(upload_rx)),
            attached: watch::Sender::new(false),
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    sessions: Mutex<HashMap<Uuid, Arc<DuplexSession>>>,
    runner: SessionRunner,
    authorization: Option<String>,
    connection_timeout: Duration,
}

/// Axum service for `POST /cli`.
#[derive(Clone)]
pub struct DuplexEndpoint {
    inner: Arc<Inner>,
}

impl DuplexEndpoint {
    /// Creates an endpoint running sessions with `runner`.
    ///
    /// Requests must carry `authorization` in their `Authorization` header
    /// when it is set.
    pub fn new(
        runner: SessionRunner,
        authorization: Option<String>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                runner,
                authorization,
                connection_timeout,
            }),
        }
    }

    /// Builds the router serving `/` and `/cli`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route(&format!("/{CLI_PATH}"), post(handle_cli))
            .with_state(self.clone())
    }

    /// Number of sessions with at least one leg attached.
    pub fn active_sessions(&self) -> usize {
        locked(&self.inner.sessions).len()
    }

    fn session(&self, id: Uuid) -> Arc<DuplexSession> {
        locked(&self.inner.sessions)
            .entry(id)
            .or_insert_with(|| Arc::new(DuplexSession::new()))
            .clone()
    }

    fn existing(&self, id: Uuid) -> Option<Arc<DuplexSession>> {
        locked(&self.inner.sessions).get(&id).cloned()
    }

    fn remove(&self, id: Uuid) {
        if locked(&self.inner.sessions).remove(&id).is_some() {
            debug!(session = %id, "session removed");
        }
    }

    fn download(&self, id: Uuid) -> Response {
        let session = self.session(id);
        let Some(upload_rx) = locked(&session.upload_rx).take() else {
            return explain(StatusCode::CONFLICT, "download side already attached");
        };
        session.attached.send_replace(true);
        info!(session = %id, "duplex session started");

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let endpoint = self.clone();
        tokio::task::spawn_blocking(move || {
            let server = ServerSide::new(FramedOutput::new(BodyWriter::new(tx)));
            let label = format!("session {id}");
            match endpoint
                .inner
                .runner
                .run(BodyReader::new(upload_rx), server, &label)
            {
                Ok(outcome) => debug!(session = %id, ?outcome, "session ended"),
                Err(e) => warn!(session = %id, error = %e, "session failed"),
            }
            endpoint.remove(id);
        });

        (
            StatusCode::OK,
            [
                (DUPLEX_HEADER, "true"),
                ("content-type", "application/octet-stream"),
            ],
            response_body(Bytes::from_static(&[INITIAL_BYTE]), rx),
        )
            .into_response()
    }

    async fn upload(&self, id: Uuid, body: Body, block: bool) -> Response {
        // Clients attach the download leg before sending any block, so a block
        // for an unknown session belongs to one that already ended.
        let session = if block {
            match self.existing(id) {
                Some(session) => session,
                None => return explain(StatusCode::NOT_FOUND, "no such session"),
            }
        } else {
            self.session(id)
        };
        let mut attached = session.attached.subscribe();
        let attached_in_time = matches!(
            tokio::time::timeout(
                self.inner.connection_timeout,
                attached.wait_for(|attached| *attached),
            )
            .await,
            Ok(Ok(_))
        );
        drop(attached);
        if !attached_in_time {
            self.remove(id);
            return explain(
                StatusCode::REQUEST_TIMEOUT,
                "timed out waiting for the download side",
            );
        }

        let tx = {
            let mut slot = locked(&session.upload_tx);
            if block { slot.clone() } else { slot.take() }
        };
        let Some(tx) = tx else {
            return explain(StatusCode::CONFLICT, "upload side already closed");
        };
        drop(session);

        match forward_body(body, &tx).await {
            Ok(bytes) => debug!(session = %id, bytes, block, "upload finished"),
            Err(e) => debug!(session = %id, error = %e, "upload interrupted"),
        }
        drop(tx);

        if block {
            (
                StatusCode::OK,
                [(DUPLEX_HEADER, "true")],
                Body::from(vec![INITIAL_BYTE]),
            )
                .into_response()
        } else {
            (StatusCode::OK, [(DUPLEX_HEADER, "true")]).into_response()
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.inner.authorization {
            None => true,
            Some(expected) => headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| {
                    constant_time::verify_slices_are_equal(value.as_bytes(), expected.as_bytes())
                        .is_ok()
                }),
        }
    }
}

/// Error response with the reason in both the header and the body.
fn explain(status: StatusCode, message: &str) -> Response {
    debug!(%status, message, "rejecting CLI request");
    (
        status,
        [(ERROR_HEADER, message.to_string())],
        format!("{message}\n"),
    )
        .into_response()
}

async fn index() -> &'static str {
    "tunnelcli\n"
}

async fn handle_cli(
    State(endpoint): State<DuplexEndpoint>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if !endpoint.authorized(&headers) {
        return explain(StatusCode::UNAUTHORIZED, "authorization required");
    }

    let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
    else {
        return explain(StatusCode::BAD_REQUEST, "missing or malformed Session header");
    };
    let side = match headers
        .get(SIDE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::parse::<Side>)
    {
        Some(Ok(side)) => side,
        Some(Err(reason)) => return explain(StatusCode::BAD_REQUEST, &reason),
        None => return explain(StatusCode::BAD_REQUEST, "missing Side header"),
    };

    debug!(session = %id, %side, "CLI request");
    match side {
        Side::Download => endpoint.download(id),
        Side::Upload => endpoint.upload(id, body, false).await,
        Side::UploadBlock => endpoint.upload(id, body, true).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};

    use axum::http::Request;
    use tower::ServiceExt;
    use tunnelcli_protocol::framing::encode_frame;
    use tunnelcli_protocol::wire::utf_payload;
    use tunnelcli_protocol::{ClientDispatch, ClientHandler, FrameReader, Op};

    use crate::registry::CommandRegistry;

    fn endpoint(authorization: Option<&str>, timeout: Duration) -> DuplexEndpoint {
        let runner = SessionRunner::new(Arc::new(CommandRegistry::with_builtins()), timeout);
        DuplexEndpoint::new(runner, authorization.map(str::to_string), timeout)
    }

    fn cli_request(session: Option<&str>, side: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/cli");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        if let Some(side) = side {
            builder = builder.header(SIDE_HEADER, side);
        }
        builder.body(body).unwrap()
    }

    fn error_header(response: &Response) -> &str {
        response
            .headers()
            .get(ERROR_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn index_answers_get() {
        let app = endpoint(None, Duration::from_secs(1)).router();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_session_is_bad_request() {
        let app = endpoint(None, Duration::from_secs(1)).router();
        let response = app
            .oneshot(cli_request(None, Some("download"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_header(&response), "missing or malformed Session header");
    }

    #[tokio::test]
    async fn unknown_side_is_bad_request() {
        let app = endpoint(None, Duration::from_secs(1)).router();
        let id = Uuid::new_v4().to_string();
        let response = app
            .oneshot(cli_request(Some(&id), Some("sideways"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_header(&response), "unknown side 'sideways'");
    }

    #[tokio::test]
    async fn wrong_authorization_is_rejected() {
        let app = endpoint(Some("Bearer s3cret"), Duration::from_secs(1)).router();
        let id = Uuid::new_v4().to_string();

        let mut request = cli_request(Some(&id), Some("download"), Body::empty());
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(cli_request(Some(&id), Some("download"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matching_authorization_is_accepted() {
        let app = endpoint(Some("Bearer s3cret"), Duration::from_millis(200)).router();
        for (value, status) in [
            ("Bearer s3cre", StatusCode::UNAUTHORIZED),
            ("Bearer s3cret!", StatusCode::UNAUTHORIZED),
            ("Bearer s3creT", StatusCode::UNAUTHORIZED),
            ("Bearer s3cret", StatusCode::OK),
        ] {
            let id = Uuid::new_v4().to_string();
            let mut request = cli_request(Some(&id), Some("download"), Body::empty());
            request
                .headers_mut()
                .insert(header::AUTHORIZATION, value.parse().unwrap());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), status, "{value}");
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn upload_future_is_send() {
        let endpoint = endpoint(None, Duration::from_secs(1));
        let upload = endpoint.upload(Uuid::new_v4(), Body::empty(), false);
        assert_send(&upload);
        let block = endpoint.upload(Uuid::new_v4(), Body::empty(), true);
        assert_send(&block);
    }

    #[tokio::test]
    async fn upload_without_download_times_out() {
        let endpoint = endpoint(None, Duration::from_millis(50));
        let id = Uuid::new_v4().to_string();
        let response = endpoint
            .router()
            .oneshot(cli_request(Some(&id), Some("upload"), Body::from("data")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(endpoint.active_sessions(), 0);
    }

    #[tokio::test]
    async fn block_for_unknown_session_is_not_found() {
        let endpoint = endpoint(None, Duration::from_secs(5));
        let id = Uuid::new_v4().to_string();
        let response = endpoint
            .router()
            .oneshot(cli_request(Some(&id), Some("upload-block"), Body::from("x")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(endpoint.active_sessions(), 0);
    }

    #[tokio::test]
    async fn second_download_conflicts() {
        let endpoint = endpoint(None, Duration::from_millis(200));
        let app = endpoint.router();
        let id = Uuid::new_v4().to_string();

        let first = app
            .clone()
            .oneshot(cli_request(Some(&id), Some("download"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get(DUPLEX_HEADER).unwrap(), "true");

        let second = app
            .oneshot(cli_request(Some(&id), Some("download"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[derive(Default)]
    struct Output {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit: Option<i32>,
    }

    impl ClientHandler for Output {
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
    }

    fn decode(bytes: &[u8]) -> Output {
        let mut stream = Cursor::new(bytes.to_vec());
        let mut first = [0u8; 1];
        stream.read_exact(&mut first).unwrap();
        assert_eq!(first[0], INITIAL_BYTE);
        let mut dispatch = ClientDispatch(Output::default());
        FrameReader::new(stream).run(&mut dispatch).unwrap();
        dispatch.0
    }

    fn command_frames(args: &[&str]) -> Vec<u8> {
        let mut frames = Vec::new();
        for arg in args {
            frames.extend(encode_frame(Op::Arg, &utf_payload(arg).unwrap()).unwrap());
        }
        frames.extend(encode_frame(Op::Locale, &utf_payload("en_US").unwrap()).unwrap());
        frames.extend(encode_frame(Op::Encoding, &utf_payload("UTF-8").unwrap()).unwrap());
        frames.extend(encode_frame(Op::Start, &[]).unwrap());
        frames.extend(encode_frame(Op::EndStdin, &[]).unwrap());
        frames
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn streamed_session_runs_command() {
        let endpoint = endpoint(None, Duration::from_secs(5));
        let app = endpoint.router();
        let id = Uuid::new_v4().to_string();

        let download = app
            .clone()
            .oneshot(cli_request(Some(&id), Some("download"), Body::empty()))
            .await
            .unwrap();
        let upload = app
            .oneshot(cli_request(
                Some(&id),
                Some("upload"),
                Body::from(command_frames(&["version"])),
            ))
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(download.into_body(), usize::MAX)
            .await
            .unwrap();
        let output = decode(&bytes);
        assert_eq!(
            String::from_utf8(output.stdout).unwrap(),
            format!("{}\n", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(output.exit, Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn block_uploads_are_confirmed_with_one_byte() {
        let endpoint = endpoint(None, Duration::from_secs(5));
        let app = endpoint.router();
        let id = Uuid::new_v4().to_string();

        let download = app
            .clone()
            .oneshot(cli_request(Some(&id), Some("download"), Body::empty()))
            .await
            .unwrap();

        let frames = command_frames(&["no-such-command"]);
        let (first, rest) = frames.split_at(7);
        for block in [first, rest] {
            let response = app
                .clone()
                .oneshot(cli_request(
                    Some(&id),
                    Some("upload-block"),
                    Body::from(block.to_vec()),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let ack = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&ack[..], &[INITIAL_BYTE]);
        }

        let bytes = axum::body::to_bytes(download.into_body(), usize::MAX)
            .await
            .unwrap();
        let output = decode(&bytes);
        assert_eq!(output.stderr, b"No such command no-such-command\n");
        assert_eq!(output.exit, Some(2));
    }
}
