//! Network Infrastructure
//!
//! Socket layer for the notification framework: a UDP listener, a
//! multiplexed TCP server backed by a shared connection registry, TCP client
//! helpers and UNIX datagram delivery. Payloads are opaque bytes here; the
//! TLV meaning is applied by `notif-chain`.

pub mod error;
pub mod transports;

pub use error::{Result, TransportError};
pub use transports::{
    send_udp_msg, tcp_connect, CommFd, DatagramHandler, PeerLink, ServerPause, TcpClient,
    TcpConnectedClient, TcpConnectionsDb, TcpEventHandler, TcpLink, TcpServer, TcpServerConfig,
    Transport, UdpConfig, UdpServer, UdpTarget, UnixDatagramServer, UnixDatagramTarget,
};
