//! Client side of a TCP connection to a publisher
//!
//! The same connection carries requests out and notifications back, so after
//! connecting a subscriber either reads replies itself ([`TcpClient::recv`])
//! or hands the read side to a background listener
//! ([`TcpClient::listen_after_connect`]).

use super::link::TcpLink;
use crate::{Result, TransportError};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default read size for client-side receives
pub const DEFAULT_CLIENT_BUFFER_SIZE: usize = 1024;

pub struct TcpClient {
    link: TcpLink,
    local_addr: SocketAddr,
    reader: Option<OwnedReadHalf>,
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

/// Connect to `addr`
pub async fn tcp_connect(addr: SocketAddr) -> Result<TcpClient> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::connection_with_source("TCP connect failed", Some(addr), e))?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let local_addr = stream.local_addr()?;
    let comm_fd = stream.as_raw_fd();
    let (reader, writer) = stream.into_split();

    info!(peer = %addr, local = %local_addr, fd = comm_fd, "Connected to TCP server");
    Ok(TcpClient {
        link: TcpLink::new(comm_fd, addr, writer),
        local_addr,
        reader: Some(reader),
        cancel: CancellationToken::new(),
        listener: None,
    })
}

impl TcpClient {
    pub fn link(&self) -> &TcpLink {
        &self.link
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.link.peer()
    }

    pub async fn send(&self, message: &[u8]) -> Result<usize> {
        self.link.send(message).await
    }

    /// Read once from the connection; `Ok(0)` means the server closed it
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        use tokio::io::AsyncReadExt;

        let peer = self.link.peer();
        let reader = self.reader.as_mut().ok_or_else(|| {
            TransportError::connection("Read side is owned by the background listener", Some(peer))
        })?;
        Ok(reader.read(buf).await?)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Move the read side onto a background task feeding `on_message`
    ///
    /// The task ends when the server closes the connection, on a read error,
    /// or on [`TcpClient::disconnect`].
    pub fn listen_after_connect<F>(&mut self, on_message: F) -> Result<()>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let peer = self.link.peer();
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| TransportError::connection("Already listening on this connection", Some(peer)))?;
        let cancel = self.cancel.clone();

        self.listener = Some(tokio::spawn(async move {
            use tokio::io::AsyncReadExt;

            let mut buf = vec![0u8; DEFAULT_CLIENT_BUFFER_SIZE];
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            info!(peer = %peer, "TCP server closed the connection");
                            break;
                        }
                        Ok(len) => {
                            debug!(peer = %peer, bytes = len, "Received TCP message");
                            on_message(&buf[..len]);
                        }
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "TCP receive failed");
                            break;
                        }
                    },
                }
            }
        }));
        Ok(())
    }

    /// Optionally send a goodbye message, then close the connection
    pub async fn disconnect(mut self, goodbye: Option<&[u8]>) -> Result<()> {
        if let Some(message) = goodbye {
            self.link.send(message).await?;
        }
        self.link.shutdown().await?;

        self.cancel.cancel();
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                warn!(peer = %self.link.peer(), error = %e, "TCP listener task ended abnormally");
            }
        }
        info!(peer = %self.link.peer(), "Disconnected from TCP server");
        Ok(())
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
