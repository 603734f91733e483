//! In-process stand-in for `radiosocketd`'s control socket.
//!
//! [`MockDaemon`] binds a real Unix socket in a temporary directory and
//! answers each request frame according to a handler closure. Every
//! request it reads is recorded for later assertions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use radiolink_core::ipc::{CallTimeouts, Dispatcher, Message, read_frame, write_frame};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write this frame.
    Frame(Message),
    /// Write these bytes verbatim (malformed or truncated frames).
    Raw(Vec<u8>),
    /// Keep the connection open without answering.
    Silent,
    /// Close the connection without answering.
    Close,
}

impl Reply {
    /// Response echoing the request id with `status` in the command field.
    pub fn status(request: &Message, status: i32) -> Self {
        Self::Frame(Message::new(request.id, status as u32))
    }

    /// Response echoing the request id carrying the given payloads.
    pub fn payloads(request: &Message, ints: Vec<i32>, chars: &[u8], doubles: Vec<f64>) -> Self {
        Self::Frame(
            Message::new(request.id, request.command)
                .with_ints(ints)
                .with_chars(chars.to_vec())
                .with_doubles(doubles),
        )
    }
}

type Handler = dyn Fn(&Message) -> Reply + Send + Sync;

/// A scripted daemon socket. The accept loop stops when this is dropped.
pub struct MockDaemon {
    socket_path: PathBuf,
    requests: Arc<Mutex<Vec<Message>>>,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl MockDaemon {
    /// Start a mock on `radiosocketd_<n>.sock` in a fresh temp directory.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Message) -> Reply + Send + Sync + 'static,
    {
        let dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = dir.path().join("radiosocketd_test.sock");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind mock socket");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(serve_connection(stream, handler, recorded));
            }
        });

        Self {
            socket_path,
            requests,
            task,
            _dir: dir,
        }
    }

    /// Mock that answers every request with status `status`.
    pub async fn answering_status(status: i32) -> Self {
        Self::start(move |request| Reply::status(request, status)).await
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().expect("request log poisoned").clone()
    }

    /// Dispatcher bound to this mock with short timeouts.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(&self.socket_path).with_timeouts(CallTimeouts {
            connect: Some(Duration::from_secs(1)),
            read: Some(Duration::from_millis(300)),
        })
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    handler: Arc<Handler>,
    recorded: Arc<Mutex<Vec<Message>>>,
) {
    let Ok(request) = read_frame(&mut stream).await else {
        return;
    };
    recorded
        .lock()
        .expect("request log poisoned")
        .push(request.clone());

    match handler(&request) {
        Reply::Frame(response) => {
            let _ = write_frame(&mut stream, &response).await;
        }
        Reply::Raw(bytes) => {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.shutdown().await;
        }
        Reply::Silent => {
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        }
        Reply::Close => {}
    }
}
