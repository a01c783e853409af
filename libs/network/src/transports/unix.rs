//! Unix Domain Datagram Transport
//!
//! Local delivery for subscribers that registered a UNIX socket path. The
//! publisher side only ever sends (from an unbound socket); the subscriber
//! side binds the path with [`UnixDatagramServer`].

use super::Transport;
use crate::{Result, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixDatagram;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Datagram destination identified by filesystem path
#[derive(Debug, Clone)]
pub struct UnixDatagramTarget {
    pub path: PathBuf,
}

impl UnixDatagramTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Transport for UnixDatagramTarget {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        let socket = UnixDatagram::unbound()?;
        let sent = socket
            .send_to(message, &self.path)
            .await
            .map_err(|e| TransportError::send(self.path.display(), e))?;

        debug!(path = %self.path.display(), bytes = sent, "Sent UNIX datagram");
        Ok(sent)
    }

    fn destination(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

/// Receive loop bound to a UNIX datagram path
///
/// The socket file is removed again on shutdown.
pub struct UnixDatagramServer {
    path: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl UnixDatagramServer {
    pub fn bind<F>(path: impl AsRef<Path>, buffer_size: usize, on_message: F) -> Result<Self>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            // stale socket left behind by a previous run
            std::fs::remove_file(&path)?;
        }

        let socket = UnixDatagram::bind(&path).map_err(|e| TransportError::bind(path.display(), e))?;
        let socket = Arc::new(socket);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let log_path = path.clone();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size.max(1)];
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = socket.recv(&mut buf) => match received {
                        Ok(len) => on_message(&buf[..len]),
                        Err(e) => warn!(path = %log_path.display(), error = %e, "UNIX datagram receive failed"),
                    },
                }
            }
        });

        info!(path = %path.display(), "UNIX datagram listener started");
        Ok(Self { path, cancel, task })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(path = %self.path.display(), error = %e, "UNIX datagram task ended abnormally");
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Socket file already gone");
        }
        Ok(())
    }
}
