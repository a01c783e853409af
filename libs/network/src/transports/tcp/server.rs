//! Multiplexed TCP server
//!
//! One task per listening address. Each loop iteration snapshots the
//! monitored connections and waits for the first of: cancellation, an
//! explicit wake, a new connection, or a readable connection. The event is
//! then handled while holding the server's pause gate, which is how
//! [`TcpConnectionsDb::shutdown_tcp_server`] and
//! [`TcpConnectionsDb::force_disconnect_client_by_comm_fd`] get a quiescent
//! loop to work against.
//!
//! A zero-byte read is a peer disconnect: the connection leaves the
//! monitored set, the handler's `on_disconnect` runs, and the client record
//! is dropped. Each successful read is delivered as one message; there is no
//! stream framing on top of TCP.

use super::db::{TcpConnectedClient, TcpConnectionsDb};
use super::link::TcpLink;
use crate::transports::CommFd;
use crate::{Result, TransportError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// TCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Local address to listen on
    pub bind_address: SocketAddr,
    /// Bytes read per receive; one read is one message
    pub buffer_size: usize,
    /// Connections accepted beyond this are closed immediately
    pub max_connections: usize,
    /// Disable Nagle on accepted connections
    pub nodelay: bool,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            buffer_size: 1024,
            max_connections: 254,
            nodelay: true,
        }
    }
}

/// Connection lifecycle callbacks, invoked on the server task
pub trait TcpEventHandler: Send + Sync + 'static {
    fn on_connect(&self, _client: &TcpConnectedClient) {}

    fn on_receive(&self, payload: &[u8], client: &TcpConnectedClient);

    fn on_disconnect(&self, _client: &TcpConnectedClient) {}
}

/// Holds a server's loop between iterations until dropped or resumed
pub struct ServerPause {
    _gate: OwnedMutexGuard<()>,
}

impl ServerPause {
    pub fn resume(self) {}
}

pub struct TcpServer {
    local_addr: SocketAddr,
    listener_fd: CommFd,
    config: TcpServerConfig,
    monitored: Mutex<HashMap<CommFd, Arc<OwnedReadHalf>>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    wake: Notify,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

enum LoopEvent {
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Readable(CommFd),
}

impl TcpServer {
    /// Bind, register with `db` and spawn the server loop
    pub async fn start<H: TcpEventHandler>(
        db: &TcpConnectionsDb,
        config: TcpServerConfig,
        handler: H,
    ) -> Result<Arc<TcpServer>> {
        if config.buffer_size == 0 {
            return Err(TransportError::configuration(
                "TCP receive buffer cannot be empty",
                Some("buffer_size"),
            ));
        }

        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| TransportError::bind(config.bind_address, e))?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(TcpServer {
            local_addr,
            listener_fd: listener.as_raw_fd(),
            config,
            monitored: Mutex::new(HashMap::new()),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        db.lock().add_server(server.clone())?;

        let task = tokio::spawn(serve(server.clone(), listener, db.clone(), Arc::new(handler)));
        *server.task.lock() = Some(task);

        info!(addr = %local_addr, "TCP server started");
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Listening socket plus every monitored connection
    pub fn monitored_fds(&self) -> Vec<CommFd> {
        let mut fds: Vec<CommFd> = self.monitored.lock().keys().copied().collect();
        fds.sort_unstable();
        fds.insert(0, self.listener_fd);
        fds
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.lock().len() + 1
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .lock()
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Wait for the loop to finish its current event, then hold it
    pub async fn pause(&self) -> ServerPause {
        ServerPause {
            _gate: self.gate.clone().lock_owned().await,
        }
    }

    /// Make the loop rebuild its monitored snapshot
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(addr = %self.local_addr, error = %e, "TCP server task ended abnormally");
            }
        }
    }

    pub(crate) fn unmonitor(&self, comm_fd: CommFd) -> bool {
        self.monitored.lock().remove(&comm_fd).is_some()
    }

    fn snapshot(&self) -> Vec<(CommFd, Arc<OwnedReadHalf>)> {
        self.monitored
            .lock()
            .iter()
            .map(|(fd, half)| (*fd, half.clone()))
            .collect()
    }

    fn admit<H: TcpEventHandler>(&self, stream: TcpStream, peer: SocketAddr, db: &TcpConnectionsDb, handler: &H) {
        if self.monitored.lock().len() >= self.config.max_connections {
            warn!(
                addr = %self.local_addr,
                peer = %peer,
                limit = self.config.max_connections,
                "TCP connection limit reached, closing new connection"
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let comm_fd = stream.as_raw_fd();
        let (read_half, write_half) = stream.into_split();
        let client = TcpConnectedClient::new(self.local_addr, TcpLink::new(comm_fd, peer, write_half));

        if !db.lock().add_client(client.clone()) {
            warn!(addr = %self.local_addr, peer = %peer, "TCP server no longer registered, dropping connection");
            return;
        }
        self.monitored.lock().insert(comm_fd, Arc::new(read_half));

        info!(addr = %self.local_addr, peer = %peer, fd = comm_fd, "Accepted TCP client");
        handler.on_connect(&client);
    }

    fn service<H: TcpEventHandler>(&self, comm_fd: CommFd, buf: &mut [u8], db: &TcpConnectionsDb, handler: &H) {
        let Some(half) = self.monitored.lock().get(&comm_fd).cloned() else {
            // force-disconnected after the snapshot was taken
            return;
        };

        match half.try_read(buf) {
            Ok(0) => self.release(comm_fd, db, handler),
            Ok(len) => match db.client(comm_fd) {
                Some(client) => {
                    debug!(peer = %client.peer, fd = comm_fd, bytes = len, "Received TCP message");
                    handler.on_receive(&buf[..len], &client);
                }
                None => {
                    error!(fd = comm_fd, addr = %self.local_addr, "Monitored TCP connection has no client record");
                    debug_assert!(false, "monitored fd without client record");
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!(fd = comm_fd, error = %e, "TCP read failed, dropping connection");
                self.release(comm_fd, db, handler);
            }
        }
    }

    fn release<H: TcpEventHandler>(&self, comm_fd: CommFd, db: &TcpConnectionsDb, handler: &H) {
        self.unmonitor(comm_fd);

        let Some(client) = db.client(comm_fd) else {
            error!(fd = comm_fd, addr = %self.local_addr, "Disconnected TCP connection has no client record");
            debug_assert!(false, "disconnect of unknown client");
            return;
        };

        info!(addr = %self.local_addr, peer = %client.peer, fd = comm_fd, "TCP client disconnected");
        handler.on_disconnect(&client);
        db.lock().remove_client(comm_fd);
    }

    async fn close_clients(&self, db: &TcpConnectionsDb) {
        for client in db.clients_of(self.local_addr) {
            if let Err(e) = client.link().shutdown().await {
                debug!(peer = %client.peer, error = %e, "TCP shutdown on server stop failed");
            }
        }
    }
}

/// Deregisters the server however the loop exits
struct ServerTeardown {
    server: Arc<TcpServer>,
    db: TcpConnectionsDb,
}

impl Drop for ServerTeardown {
    fn drop(&mut self) {
        let record = self.db.lock().remove_server(self.server.local_addr);
        self.server.monitored.lock().clear();
        let clients = record.map(|r| r.clients.len()).unwrap_or(0);
        info!(addr = %self.server.local_addr, clients, "TCP server stopped");
    }
}

async fn wait_readable(snapshot: &[(CommFd, Arc<OwnedReadHalf>)]) -> CommFd {
    if snapshot.is_empty() {
        return std::future::pending().await;
    }

    let waits = snapshot.iter().map(|(fd, half)| {
        let fd = *fd;
        Box::pin(async move {
            // an error still counts as ready; the read that follows reports it
            let _ = half.readable().await;
            fd
        })
    });
    let (fd, _, _) = futures::future::select_all(waits).await;
    fd
}

async fn serve<H: TcpEventHandler>(
    server: Arc<TcpServer>,
    listener: TcpListener,
    db: TcpConnectionsDb,
    handler: Arc<H>,
) {
    let _teardown = ServerTeardown {
        server: server.clone(),
        db: db.clone(),
    };
    let mut buf = vec![0u8; server.config.buffer_size];

    loop {
        let snapshot = server.snapshot();

        let event = tokio::select! {
            biased;
            _ = server.cancel.cancelled() => break,
            _ = server.wake.notified() => {
                debug!(addr = %server.local_addr, "TCP server woken, rebuilding monitored set");
                continue;
            }
            accepted = listener.accept() => LoopEvent::Accepted(accepted),
            comm_fd = wait_readable(&snapshot) => LoopEvent::Readable(comm_fd),
        };
        drop(snapshot);

        let _gate = tokio::select! {
            biased;
            _ = server.cancel.cancelled() => break,
            gate = server.gate.lock() => gate,
        };

        match event {
            LoopEvent::Accepted(Ok((stream, peer))) => server.admit(stream, peer, &db, handler.as_ref()),
            LoopEvent::Accepted(Err(e)) => warn!(addr = %server.local_addr, error = %e, "TCP accept failed"),
            LoopEvent::Readable(comm_fd) => server.service(comm_fd, &mut buf, &db, handler.as_ref()),
        }
    }

    server.close_clients(&db).await;
}
