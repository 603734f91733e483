//! Transport session: one connection, one request, one response.
//!
//! Every call opens a fresh Unix stream connection to the daemon's
//! endpoint, writes the request frame, blocks on the response frame and
//! drops the connection. Nothing is pooled; the stream is closed on every
//! return path when it goes out of scope.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::trace;

use super::frame::{FrameError, Message, read_frame, write_frame};

/// Errors from a single request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    ConnectFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoFailed(#[source] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[source] FrameError),

    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: u32, actual: u32 },

    #[error("correlation id space exhausted")]
    IdSpaceExhausted,
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::IoFailed(e),
            other => Self::Frame(other),
        }
    }
}

/// Timeouts applied to one exchange. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTimeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
}

/// Perform one exchange with the daemon listening at `endpoint`.
///
/// A response whose id differs from the request's is
/// [`TransportError::IdMismatch`]; it is never handed back to the caller.
pub async fn call(
    endpoint: &Path,
    request: &Message,
    timeouts: CallTimeouts,
) -> Result<Message, TransportError> {
    let connect_failed = |source| TransportError::ConnectFailed {
        path: endpoint.to_path_buf(),
        source,
    };
    let mut stream = with_timeout(timeouts.connect, UnixStream::connect(endpoint))
        .await
        .map_err(connect_failed)?;

    trace!(id = request.id, command = request.command, "IPC request");
    write_frame(&mut stream, request).await?;

    let response = match timeouts.read {
        Some(limit) => tokio::time::timeout(limit, read_frame(&mut stream))
            .await
            .map_err(|_| TransportError::IoFailed(timed_out(limit)))??,
        None => read_frame(&mut stream).await?,
    };
    trace!(id = response.id, command = response.command, "IPC response");

    if response.id != request.id {
        return Err(TransportError::IdMismatch {
            expected: request.id,
            actual: response.id,
        });
    }
    Ok(response)
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| timed_out(limit))?,
        None => fut.await,
    }
}

fn timed_out(limit: Duration) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("no answer within {limit:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("radiosocketd_test.sock")
    }

    /// Accept one connection, read one frame, answer with `reply` bytes.
    fn serve_once(listener: UnixListener, reply: impl FnOnce(Message) -> Vec<u8> + Send + 'static) {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut stream).await.unwrap();
            let bytes = reply(request);
            tokio::io::AsyncWriteExt::write_all(&mut stream, &bytes)
                .await
                .unwrap();
        });
    }

    #[tokio::test]
    async fn test_connect_failed_when_endpoint_absent() {
        let dir = tempfile::tempdir().unwrap();
        let result = call(&socket_in(&dir), &Message::new(1, 1u32), CallTimeouts::default()).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_matching_id_returns_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |req| {
            Message::new(req.id, 0u32)
                .with_ints(req.payload_int)
                .encode()
                .unwrap()
        });

        let request = Message::new(5, 2u32).with_ints(vec![1, 0x1007]);
        let response = call(&path, &request, CallTimeouts::default()).await.unwrap();
        assert_eq!(response.id, 5);
        assert_eq!(response.status(), 0);
        assert_eq!(response.payload_int, vec![1, 0x1007]);
    }

    #[tokio::test]
    async fn test_id_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |_| Message::new(8, 0u32).encode().unwrap());

        let result = call(&path, &Message::new(7, 1u32), CallTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(TransportError::IdMismatch {
                expected: 7,
                actual: 8
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_response_is_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |req| {
            let mut bytes = Message::new(req.id, 0u32)
                .with_doubles(vec![1.0, 2.0])
                .encode()
                .unwrap();
            bytes.truncate(bytes.len() - 4);
            bytes
        });

        let result = call(&path, &Message::new(1, 1u32), CallTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::ShortRead { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_timeout_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering.
            let _ = release_rx.await;
        });

        let timeouts = CallTimeouts {
            connect: None,
            read: Some(Duration::from_millis(50)),
        };
        let result = call(&path, &Message::new(1, 1u32), timeouts).await;
        match result {
            Err(err @ TransportError::IoFailed(_)) => {
                let source = std::error::Error::source(&err)
                    .and_then(|s| s.downcast_ref::<std::io::Error>())
                    .expect("io error exposed as source");
                assert_eq!(source.kind(), std::io::ErrorKind::TimedOut)
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let _ = release_tx.send(());
    }
}
