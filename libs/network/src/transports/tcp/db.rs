//! Connection registry shared by every TCP server in the process
//!
//! One mutex guards the whole registry. Helpers that must run while the lock
//! is already held live on [`DbInner`] and take `&mut self`, so "already
//! locked" is expressed by holding the guard rather than by a flag.

use super::link::TcpLink;
use super::server::TcpServer;
use crate::transports::CommFd;
use crate::{Result, TransportError};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Accepted connection tracked by its server
#[derive(Debug, Clone)]
pub struct TcpConnectedClient {
    pub comm_fd: CommFd,
    pub peer: SocketAddr,
    /// Listening address of the owning server
    pub server: SocketAddr,
    link: TcpLink,
}

impl TcpConnectedClient {
    pub(crate) fn new(server: SocketAddr, link: TcpLink) -> Self {
        Self {
            comm_fd: link.comm_fd(),
            peer: link.peer(),
            server,
            link,
        }
    }

    /// Write side of the connection, for replies and notifications
    pub fn link(&self) -> &TcpLink {
        &self.link
    }
}

pub(crate) struct ServerRecord {
    pub(crate) server: Arc<TcpServer>,
    pub(crate) clients: HashMap<CommFd, TcpConnectedClient>,
}

#[derive(Default)]
pub(crate) struct DbInner {
    servers: HashMap<SocketAddr, ServerRecord>,
    /// comm fd → owning server, for O(1) client lookup
    fd_index: HashMap<CommFd, SocketAddr>,
}

impl DbInner {
    pub(crate) fn add_server(&mut self, server: Arc<TcpServer>) -> Result<()> {
        let addr = server.local_addr();
        if self.servers.contains_key(&addr) {
            return Err(TransportError::configuration(
                format!("TCP server already registered on {}", addr),
                Some("bind_address"),
            ));
        }
        self.servers.insert(
            addr,
            ServerRecord {
                server,
                clients: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Deregister a server together with any clients still attached
    pub(crate) fn remove_server(&mut self, addr: SocketAddr) -> Option<ServerRecord> {
        let record = self.servers.remove(&addr)?;
        for fd in record.clients.keys() {
            self.fd_index.remove(fd);
        }
        Some(record)
    }

    /// Returns false when the owning server is no longer registered
    pub(crate) fn add_client(&mut self, client: TcpConnectedClient) -> bool {
        let Some(record) = self.servers.get_mut(&client.server) else {
            return false;
        };
        self.fd_index.insert(client.comm_fd, client.server);
        record.clients.insert(client.comm_fd, client);
        true
    }

    pub(crate) fn remove_client(&mut self, comm_fd: CommFd) -> Option<TcpConnectedClient> {
        let server = self.fd_index.remove(&comm_fd)?;
        let removed = self
            .servers
            .get_mut(&server)
            .and_then(|record| record.clients.remove(&comm_fd));

        if removed.is_none() {
            error!(fd = comm_fd, server = %server, "Indexed TCP client missing from its server");
            debug_assert!(false, "fd index out of sync with server client list");
        }
        removed
    }

    pub(crate) fn lookup_client(&self, comm_fd: CommFd) -> Option<(&Arc<TcpServer>, &TcpConnectedClient)> {
        let server = self.fd_index.get(&comm_fd)?;
        let record = self.servers.get(server)?;
        record.clients.get(&comm_fd).map(|client| (&record.server, client))
    }
}

/// Process-wide registry of TCP servers and their connected clients
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone, Default)]
pub struct TcpConnectionsDb {
    inner: Arc<Mutex<DbInner>>,
}

impl TcpConnectionsDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DbInner> {
        self.inner.lock()
    }

    pub fn server(&self, addr: SocketAddr) -> Option<Arc<TcpServer>> {
        self.lock().servers.get(&addr).map(|r| r.server.clone())
    }

    pub fn server_addrs(&self) -> Vec<SocketAddr> {
        self.lock().servers.keys().copied().collect()
    }

    pub fn server_count(&self) -> usize {
        self.lock().servers.len()
    }

    pub fn client(&self, comm_fd: CommFd) -> Option<TcpConnectedClient> {
        self.lock().lookup_client(comm_fd).map(|(_, c)| c.clone())
    }

    pub fn clients_of(&self, server: SocketAddr) -> Vec<TcpConnectedClient> {
        self.lock()
            .servers
            .get(&server)
            .map(|r| r.clients.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn client_count(&self) -> usize {
        self.lock().fd_index.len()
    }

    /// Stop a server and wait until its loop has released everything
    ///
    /// The server is paused first so the loop cannot be mid-event when it
    /// observes cancellation.
    pub async fn shutdown_tcp_server(&self, addr: SocketAddr) -> Result<()> {
        let server = self.server(addr).ok_or(TransportError::UnknownServer { addr })?;

        let pause = server.pause().await;
        server.cancel();
        server.join().await;
        pause.resume();

        if self.server(addr).is_some() {
            error!(server = %addr, "TCP server still registered after shutdown");
            debug_assert!(false, "server teardown did not deregister");
            return Err(TransportError::connection("TCP server teardown incomplete", Some(addr)));
        }

        info!(server = %addr, "TCP server shut down");
        Ok(())
    }

    /// Drop one client connection from outside its server loop
    ///
    /// Returns false when no client owns `comm_fd`. Must not be called from
    /// inside a [`super::TcpEventHandler`] callback: the callback runs while
    /// the server is paused by its own loop.
    pub async fn force_disconnect_client_by_comm_fd(&self, comm_fd: CommFd) -> bool {
        let found = self
            .lock()
            .lookup_client(comm_fd)
            .map(|(server, client)| (server.clone(), client.clone()));
        let Some((server, client)) = found else {
            debug!(fd = comm_fd, "Force disconnect of unknown TCP client");
            return false;
        };

        let pause = server.pause().await;
        server.unmonitor(comm_fd);
        pause.resume();
        server.wake();

        if let Err(e) = client.link.shutdown().await {
            warn!(fd = comm_fd, peer = %client.peer, error = %e, "TCP shutdown during force disconnect failed");
        }
        self.lock().remove_client(comm_fd);

        info!(fd = comm_fd, peer = %client.peer, server = %client.server, "Force disconnected TCP client");
        true
    }

    /// Human readable listing of servers and their clients
    pub fn dump(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();
        let mut addrs: Vec<_> = inner.servers.keys().copied().collect();
        addrs.sort();

        for addr in addrs {
            let record = &inner.servers[&addr];
            let _ = writeln!(
                out,
                "TCP server {} (monitored fds: {}, clients: {})",
                addr,
                record.server.monitored_count(),
                record.clients.len()
            );
            let mut clients: Vec<_> = record.clients.values().collect();
            clients.sort_by_key(|c| c.comm_fd);
            for client in clients {
                let _ = writeln!(out, "  client fd {} peer {}", client.comm_fd, client.peer);
            }
        }
        out
    }
}
