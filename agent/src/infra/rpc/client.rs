//! Caller side of the privileged RPC channel.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_common::codec;
use fleet_common::rpc::{UNKNOWN_METHOD_ERROR, read_frame, write_frame};
use fleet_common::{RpcRequest, RpcResponse, Value};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, watch};

use crate::domain::RpcError;

/// Connection lifecycle of an [`RpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Ready,
    /// Terminal: every later call fails with [`RpcError::Shutdown`].
    Shutdown,
}

/// Client for a Unix-socket RPC server.
///
/// Connects on first use and again after the connection is lost. Calls are
/// serialised over the single connection.
pub struct RpcClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    call_timeout: Duration,
    conn: Mutex<Option<UnixStream>>,
    state: watch::Sender<ChannelState>,
}

enum CallFailure {
    /// The request never left this process.
    NotSent(io::Error),
    Lost(io::Error),
    Protocol(String),
}

impl RpcClient {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, call_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            socket_path: socket_path.into(),
            connect_timeout: Duration::from_secs(5),
            call_timeout,
            conn: Mutex::new(None),
            state,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Close the connection for good.
    pub async fn shutdown(&self) {
        let mut conn = self.conn.lock().await;
        conn.take();
        self.state.send_replace(ChannelState::Shutdown);
        tracing::debug!(socket = %self.socket_path.display(), "privileged channel shut down");
    }

    async fn connect(&self) -> Result<UnixStream, RpcError> {
        self.state.send_replace(ChannelState::Connecting);
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            UnixStream::connect(&self.socket_path),
        )
        .await;
        match attempt {
            Ok(Ok(stream)) => {
                self.state.send_replace(ChannelState::Ready);
                Ok(stream)
            }
            Ok(Err(e)) => {
                self.state.send_replace(ChannelState::Disconnected);
                Err(RpcError::Unavailable(format!(
                    "{}: {e}",
                    self.socket_path.display()
                )))
            }
            Err(_) => {
                self.state.send_replace(ChannelState::Disconnected);
                Err(RpcError::Unavailable(format!(
                    "{}: connect timed out",
                    self.socket_path.display()
                )))
            }
        }
    }

    /// Invoke a remote method and wait for its single reply.
    pub async fn call(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let mut conn = self.conn.lock().await;
        if self.state() == ChannelState::Shutdown {
            return Err(RpcError::Shutdown);
        }

        let method = request.method.clone();
        let envelope = request.into_value();
        let payload = codec::encode(&envelope).map_err(|e| RpcError::Protocol(e.to_string()))?;

        let reused = conn.is_some();
        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let mut outcome =
            tokio::time::timeout(self.call_timeout, roundtrip(&mut stream, &payload)).await;
        // A connection the server closed while idle refuses the write; the
        // request was never delivered, so one fresh connection is safe.
        if reused && matches!(outcome, Ok(Err(CallFailure::NotSent(_)))) {
            tracing::debug!(%method, "stale privileged connection; reconnecting");
            stream = self.connect().await?;
            outcome =
                tokio::time::timeout(self.call_timeout, roundtrip(&mut stream, &payload)).await;
        }

        let response = match outcome {
            Ok(Ok(response)) => {
                *conn = Some(stream);
                response
            }
            Ok(Err(failure)) => {
                self.state.send_replace(ChannelState::Disconnected);
                let err = match failure {
                    CallFailure::NotSent(e) | CallFailure::Lost(e) => {
                        RpcError::ChannelClosed(e.to_string())
                    }
                    CallFailure::Protocol(reason) => RpcError::Protocol(reason),
                };
                tracing::warn!(%method, error = %err, "privileged channel lost");
                return Err(err);
            }
            Err(_) => {
                self.state.send_replace(ChannelState::Disconnected);
                tracing::warn!(%method, timeout = ?self.call_timeout, "privileged call timed out");
                return Err(RpcError::Timeout(self.call_timeout));
            }
        };

        match response {
            RpcResponse::Ok(value) => Ok(value),
            RpcResponse::Err(failure) if failure.class == UNKNOWN_METHOD_ERROR => {
                Err(RpcError::UnknownMethod(method))
            }
            RpcResponse::Err(failure) => Err(RpcError::Remote {
                class: failure.class,
                message: failure.message,
            }),
        }
    }
}

async fn roundtrip(stream: &mut UnixStream, payload: &[u8]) -> Result<RpcResponse, CallFailure> {
    write_frame(stream, payload)
        .await
        .map_err(CallFailure::NotSent)?;
    let frame = read_frame(stream)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => CallFailure::Protocol(e.to_string()),
            _ => CallFailure::Lost(e),
        })?
        .ok_or_else(|| {
            CallFailure::Lost(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the reply",
            ))
        })?;
    let value = codec::decode(&frame).map_err(|e| CallFailure::Protocol(e.to_string()))?;
    RpcResponse::from_value(value).map_err(|e| CallFailure::Protocol(e.to_string()))
}
