//! TCP Transport
//!
//! - [`server`]: listener loop multiplexing every accepted connection
//! - [`db`]: registry of servers and clients with shutdown/force-disconnect
//! - [`link`]: shared write handle used to reply on a connection
//! - [`client`]: connect, send, background receive, disconnect

pub mod client;
pub mod db;
pub mod link;
pub mod server;

pub use client::{tcp_connect, TcpClient};
pub use db::{TcpConnectedClient, TcpConnectionsDb};
pub use link::TcpLink;
pub use server::{ServerPause, TcpEventHandler, TcpServer, TcpServerConfig};
