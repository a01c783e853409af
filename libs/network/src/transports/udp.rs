//! UDP Transport
//!
//! A listener bound once to a local port, running a receive loop on its own
//! task and handing every datagram to a [`DatagramHandler`] together with the
//! sender's address and the bound socket (so replies can leave from the same
//! port). Sending is connectionless: [`send_udp_msg`] reuses a caller-supplied
//! socket when there is one and opens an ephemeral socket otherwise.

use super::Transport;
use crate::{Result, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest datagram a listener reads in one call
pub const DEFAULT_PACKET_BUFFER_SIZE: usize = 1024;

/// UDP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Local address to bind to
    pub bind_address: SocketAddr,
    /// Receive buffer size; longer datagrams are truncated
    pub buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
        }
    }
}

/// Receives datagrams from a [`UdpServer`]
///
/// Called on the listener task; long work should be handed off.
pub trait DatagramHandler: Send + Sync + 'static {
    fn on_datagram(&self, payload: &[u8], sender: SocketAddr, socket: &Arc<UdpSocket>);
}

impl<F> DatagramHandler for F
where
    F: Fn(&[u8], SocketAddr, &Arc<UdpSocket>) + Send + Sync + 'static,
{
    fn on_datagram(&self, payload: &[u8], sender: SocketAddr, socket: &Arc<UdpSocket>) {
        self(payload, sender, socket)
    }
}

/// Running UDP listener
///
/// Dropping the handle leaves the listener running (detached); call
/// [`UdpServer::shutdown`] to stop it.
pub struct UdpServer {
    local_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl UdpServer {
    /// Bind and start the receive loop
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<H: DatagramHandler>(config: &UdpConfig, handler: H) -> Result<Self> {
        if config.buffer_size == 0 {
            return Err(TransportError::configuration(
                "UDP receive buffer cannot be empty",
                Some("buffer_size"),
            ));
        }

        let socket = UdpSocket::bind(config.bind_address)
            .await
            .map_err(|e| TransportError::bind(config.bind_address, e))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(receive_loop(
            socket.clone(),
            Arc::new(handler),
            cancel.clone(),
            config.buffer_size,
        ));

        info!(addr = %local_addr, "UDP listener started");

        Ok(Self {
            local_addr,
            socket,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound socket, usable for sending replies from the listening port
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Stop the receive loop and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(addr = %self.local_addr, error = %e, "UDP listener task ended abnormally");
        }
        info!(addr = %self.local_addr, "UDP listener stopped");
        Ok(())
    }
}

async fn receive_loop<H: DatagramHandler>(
    socket: Arc<UdpSocket>,
    handler: Arc<H>,
    cancel: CancellationToken,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, sender)) => {
                    debug!(peer = %sender, bytes = len, "Received UDP datagram");
                    handler.on_datagram(&buf[..len], sender, &socket);
                }
                Err(e) => {
                    // ICMP errors from earlier sends surface here; keep serving
                    warn!(error = %e, "UDP receive failed");
                }
            },
        }
    }
}

fn ephemeral_bind_addr(dest: &SocketAddr) -> SocketAddr {
    match dest {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Send one datagram to `dest`
///
/// With `socket` the datagram leaves from that socket's port; without it an
/// ephemeral socket is opened for this call only.
pub async fn send_udp_msg(dest: SocketAddr, message: &[u8], socket: Option<&UdpSocket>) -> Result<usize> {
    let sent = match socket {
        Some(socket) => socket.send_to(message, dest).await,
        None => {
            let bind = ephemeral_bind_addr(&dest);
            let socket = UdpSocket::bind(bind)
                .await
                .map_err(|e| TransportError::bind(bind, e))?;
            socket.send_to(message, dest).await
        }
    }
    .map_err(|e| TransportError::send(dest, e))?;

    debug!(peer = %dest, bytes = sent, "Sent UDP datagram");
    Ok(sent)
}

/// UDP destination, optionally pinned to a local socket
#[derive(Debug, Clone)]
pub struct UdpTarget {
    pub dest: SocketAddr,
    pub socket: Option<Arc<UdpSocket>>,
}

#[async_trait]
impl Transport for UdpTarget {
    async fn send(&self, message: &[u8]) -> Result<usize> {
        send_udp_msg(self.dest, message, self.socket.as_deref()).await
    }

    fn destination(&self) -> String {
        format!("udp://{}", self.dest)
    }
}
