//! Privileged side of the RPC channel: a Unix-socket listener that answers
//! one request at a time per connection.

use std::future::Future;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_common::rpc::{BAD_REQUEST_ERROR, UNKNOWN_METHOD_ERROR, read_frame, send_value};
use fleet_common::{RpcRequest, RpcResponse, codec};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::application::ports::RpcService;

/// Socket file mode: owner only.
const SOCKET_MODE: u32 = 0o600;

pub struct RpcServer {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<dyn RpcService>,
}

impl RpcServer {
    /// Bind the socket, replacing a stale one left by a previous run.
    pub fn bind(path: impl Into<PathBuf>, service: Arc<dyn RpcService>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        remove_stale_socket(&path)?;
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("cannot bind {}", path.display()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("cannot restrict permissions of {}", path.display()))?;
        Ok(Self {
            listener,
            path,
            service,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves. Then stop accepting,
    /// let every connection finish the request it is serving, and remove
    /// the socket file.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            listener,
            path,
            service,
        } = self;
        tokio::pin!(shutdown);
        tracing::info!(socket = %path.display(), "privileged RPC server listening");
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(
                            stream,
                            Arc::clone(&service),
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }
            }
        }

        drop(listener);
        let _ = std::fs::remove_file(&path);
        stop_tx.send_replace(true);
        if !connections.is_empty() {
            tracing::info!(open = connections.len(), "waiting for privileged calls in progress");
        }
        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }
        tracing::info!(socket = %path.display(), "privileged RPC server stopped");
        Ok(())
    }
}

/// Remove a socket left by a previous run. Anything other than a socket at
/// `path` is refused.
fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("cannot inspect {}", path.display())),
    };
    if !metadata.file_type().is_socket() {
        anyhow::bail!("{} exists and is not a socket", path.display());
    }
    std::fs::remove_file(path)
        .with_context(|| format!("cannot remove stale {}", path.display()))?;
    tracing::debug!(socket = %path.display(), "removed stale socket");
    Ok(())
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "privileged connection handler panicked");
        }
    }
}

/// Serve requests until the peer hangs up or `stop` is raised. `stop` is
/// only observed between requests; a call that was read is always answered.
async fn handle_connection(
    mut stream: UnixStream,
    service: Arc<dyn RpcService>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let read = tokio::select! {
            biased;
            _ = stop.changed() => break,
            read = read_frame(&mut stream) => read,
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "dropping privileged connection");
                break;
            }
        };
        let response = answer(&frame, service.as_ref()).await;
        if let Err(e) = send_value(&mut stream, &response.into_value()).await {
            tracing::debug!(error = %e, "cannot write privileged reply");
            break;
        }
    }
}

async fn answer(frame: &[u8], service: &dyn RpcService) -> RpcResponse {
    let request = match codec::decode(frame).and_then(RpcRequest::from_value) {
        Ok(request) => request,
        Err(e) => return RpcResponse::failure(BAD_REQUEST_ERROR, e.to_string()),
    };
    if !service.exposed_methods().contains(&request.method.as_str()) {
        tracing::warn!(method = %request.method, "refused call to unexposed method");
        return RpcResponse::failure(
            UNKNOWN_METHOD_ERROR,
            format!("method {} is not exposed", request.method),
        );
    }
    match service.invoke(&request).await {
        Ok(value) => RpcResponse::Ok(value),
        Err(failure) => RpcResponse::Err(failure),
    }
}
