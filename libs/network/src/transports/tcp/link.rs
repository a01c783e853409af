use super::super::{CommFd, Transport};
use crate::{Result, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared write side of one TCP connection
///
/// Cloning is cheap; all clones write to the same socket and are serialized
/// by an internal lock, so concurrent notifications never interleave.
#[derive(Debug, Clone)]
pub struct TcpLink {
    comm_fd: CommFd,
    peer: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl TcpLink {
    pub(crate) fn new(comm_fd: CommFd, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            comm_fd,
            peer,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn comm_fd(&self) -> CommFd {
        self.comm_fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write the whole message
    pub async fn send(&self, message: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(message)
            .await
            .map_err(|e| TransportError::send(self.peer, e))?;

        debug!(peer = %self.peer, fd = self.comm_fd, bytes = message.len(), "Sent TCP message");
        Ok(message.len())
    }

    /// Half-close the connection; the peer reads end-of-stream
    pub async fn shutdown(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| TransportError::connection_with_source("TCP shutdown failed", Some(self.peer), e))
    }

    /// True when both handles write to the same socket
    pub fn same_connection(&self, other: &TcpLink) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }
}

#[async_trait]
impl Transport for TcpLink {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        TcpLink::send(self, message).await
    }

    fn destination(&self) -> String {
        format!("tcp://{} (fd {})", self.peer, self.comm_fd)
    }
}
