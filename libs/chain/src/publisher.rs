//! Publisher bootstrap
//!
//! Starts the configured UDP and TCP listeners and routes every received
//! message into [`NotifChainDb::process_remote_subscriber_request`]. A
//! single read holding several requests is split into messages first. Requests
//! arriving over TCP keep their connection as the reply link, so TCP
//! subscribers are notified on the connection they subscribed over.

use crate::config::PublisherSettings;
use crate::elem::NotifChainElem;
use crate::error::{NotifError, NotifResult};
use crate::registry::NotifChainDb;
use crate::remote::{RemoteOutcome, RemoteSender};
use crate::wire::split_messages;
use notif_network::{
    DatagramHandler, PeerLink, TcpConnectedClient, TcpConnectionsDb, TcpEventHandler, TcpServer, UdpServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Answers NOTIFY_ALL requests: called with the chain name and the decoded
/// request, on the listener task
pub type ReplayHandler = Arc<dyn Fn(&str, &NotifChainElem) + Send + Sync>;

struct RequestRouter {
    db: Arc<NotifChainDb>,
    replay: Option<ReplayHandler>,
}

impl RequestRouter {
    fn route(&self, payload: &[u8], sender: RemoteSender) {
        for message in split_messages(payload) {
            self.route_one(message, &sender);
        }
    }

    fn route_one(&self, payload: &[u8], sender: &RemoteSender) {
        match self.db.process_remote_subscriber_request(payload, sender) {
            Ok(RemoteOutcome::NotifyAllRequested { chain, request }) => match &self.replay {
                Some(replay) => replay(&chain, &request),
                None => warn!(chain = %chain, peer = %sender.addr, "NOTIFY_ALL requested but no replay handler is set"),
            },
            Ok(outcome) => debug!(peer = %sender.addr, ?outcome, "Subscriber request applied"),
            Err(e @ NotifError::ProtocolViolation { .. }) => {
                if self.db.settings().abort_on_protocol_violation {
                    error!(peer = %sender.addr, error = %e, "Fatal protocol violation, aborting");
                    std::process::abort();
                }
                error!(peer = %sender.addr, error = %e, "Dropping request");
            }
            Err(e) if e.is_rejection() => warn!(peer = %sender.addr, error = %e, "Subscriber request rejected"),
            Err(NotifError::Protocol(e)) if e.is_malformed_input() => {
                warn!(peer = %sender.addr, error = %e, len = payload.len(), "Malformed subscriber request")
            }
            Err(e) => error!(peer = %sender.addr, error = %e, category = e.category(), "Subscriber request failed"),
        }
    }
}

impl DatagramHandler for RequestRouter {
    fn on_datagram(&self, payload: &[u8], sender: SocketAddr, socket: &Arc<UdpSocket>) {
        self.route(payload, RemoteSender::new(sender, Some(PeerLink::Udp(socket.clone()))));
    }
}

impl TcpEventHandler for RequestRouter {
    fn on_connect(&self, client: &TcpConnectedClient) {
        debug!(peer = %client.peer, fd = client.comm_fd, "Subscriber connected");
    }

    fn on_receive(&self, payload: &[u8], client: &TcpConnectedClient) {
        self.route(
            payload,
            RemoteSender::new(client.peer, Some(PeerLink::Tcp(client.link().clone()))),
        );
    }

    fn on_disconnect(&self, client: &TcpConnectedClient) {
        info!(peer = %client.peer, fd = client.comm_fd, "Subscriber disconnected");
    }
}

/// Running publisher listeners over a shared chain registry
pub struct Publisher {
    db: Arc<NotifChainDb>,
    connections: TcpConnectionsDb,
    udp: Option<UdpServer>,
    tcp: Option<Arc<TcpServer>>,
}

impl Publisher {
    pub async fn start(db: Arc<NotifChainDb>, settings: &PublisherSettings) -> NotifResult<Self> {
        Self::launch(db, settings, None).await
    }

    pub async fn start_with_replay(
        db: Arc<NotifChainDb>,
        settings: &PublisherSettings,
        replay: ReplayHandler,
    ) -> NotifResult<Self> {
        Self::launch(db, settings, Some(replay)).await
    }

    async fn launch(db: Arc<NotifChainDb>, settings: &PublisherSettings, replay: Option<ReplayHandler>) -> NotifResult<Self> {
        if settings.udp.is_none() && settings.tcp.is_none() {
            return Err(NotifError::Config("publisher needs a UDP or TCP listener".to_string()));
        }

        let connections = TcpConnectionsDb::new();

        let udp = match &settings.udp {
            Some(config) => {
                let router = RequestRouter {
                    db: db.clone(),
                    replay: replay.clone(),
                };
                Some(UdpServer::start(config, router).await?)
            }
            None => None,
        };

        let tcp = match &settings.tcp {
            Some(config) => {
                let router = RequestRouter {
                    db: db.clone(),
                    replay,
                };
                match TcpServer::start(&connections, config.clone(), router).await {
                    Ok(server) => Some(server),
                    Err(e) => {
                        if let Some(udp) = udp {
                            udp.shutdown().await?;
                        }
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        info!(
            udp = ?udp.as_ref().map(UdpServer::local_addr),
            tcp = ?tcp.as_ref().map(|s| s.local_addr()),
            chains = db.chain_count(),
            "Publisher started"
        );
        Ok(Self {
            db,
            connections,
            udp,
            tcp,
        })
    }

    pub fn db(&self) -> &Arc<NotifChainDb> {
        &self.db
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().map(UdpServer::local_addr)
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(|server| server.local_addr())
    }

    /// TCP subscriber connections
    pub fn connections(&self) -> &TcpConnectionsDb {
        &self.connections
    }

    /// Stop both listeners and close every subscriber connection
    pub async fn shutdown(self) -> NotifResult<()> {
        if let Some(udp) = self.udp {
            udp.shutdown().await?;
        }
        if let Some(tcp) = self.tcp {
            self.connections.shutdown_tcp_server(tcp.local_addr()).await?;
        }
        info!("Publisher stopped");
        Ok(())
    }
}
