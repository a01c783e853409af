//! Transport Layer
//!
//! Socket plumbing for the notification framework:
//! - [`udp`]: datagram listener and fire-and-forget send
//! - [`tcp`]: multiplexed TCP server with a shared connection registry,
//!   pause/resume, forced disconnect and shutdown, plus client helpers
//! - [`unix`]: UNIX datagram delivery
//!
//! Every way of reaching a subscriber implements [`Transport`], so the
//! notification engine can dispatch without caring which socket type sits
//! underneath.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::UdpSocket;

pub mod tcp;
pub mod udp;
pub mod unix;


pub use tcp::{
    tcp_connect, ServerPause, TcpClient, TcpConnectedClient, TcpConnectionsDb, TcpEventHandler,
    TcpLink, TcpServer, TcpServerConfig,
};
pub use udp::{send_udp_msg, DatagramHandler, UdpConfig, UdpServer, UdpTarget};
pub use unix::{UnixDatagramServer, UnixDatagramTarget};

/// OS descriptor of a connected socket, used as the connection identity
pub type CommFd = std::os::fd::RawFd;

/// One-way delivery of an encoded message to a single peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the whole message, returning the number of bytes written
    async fn send(&self, message: &[u8]) -> Result<usize>;

    /// Human readable destination for logs
    fn destination(&self) -> String;
}

/// Handle on the socket a remote request arrived on
///
/// Attached to a subscriber's channel so notifications go back out over the
/// same socket (the bound UDP port, or the accepted TCP connection).
#[derive(Debug, Clone)]
pub enum PeerLink {
    Udp(Arc<UdpSocket>),
    Tcp(TcpLink),
}

impl PeerLink {
    pub fn is_tcp(&self) -> bool {
        matches!(self, PeerLink::Tcp(_))
    }
}
