//! Subscriber side
//!
//! Local subscribers register a callback directly on a [`NotifChainDb`].
//! Remote subscribers build a request element, serialize it and send it to
//! the publisher over UDP, or over a TCP connection that then carries the
//! notifications back.

use crate::channel::CommChannel;
use crate::elem::{NotifChainElem, Notification};
use crate::error::{NotifError, NotifResult};
use crate::registry::NotifChainDb;
use crate::wire::{deserialize, serialize};
use notif_codec::{Opcode, Protocol};
use notif_network::{send_udp_msg, tcp_connect, TcpClient, UdpConfig, UdpServer};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subscribe an in-process callback
///
/// Returns the channel so the same callback instance can unsubscribe later.
pub fn subscribe_by_callback<F>(
    db: &NotifChainDb,
    chain: &str,
    client_id: u32,
    key: Option<&[u8]>,
    callback: F,
) -> NotifResult<CommChannel>
where
    F: Fn(&Notification) + Send + Sync + 'static,
{
    let channel = CommChannel::callback(callback);
    let mut elem = NotifChainElem::new(client_id, channel.clone()).with_opcode(Opcode::Subscribe);
    if let Some(key) = key {
        elem = elem.with_key(bytes::Bytes::copy_from_slice(key));
    }
    db.subscribe(chain, elem)?;
    Ok(channel)
}

pub fn unsubscribe_by_callback(
    db: &NotifChainDb,
    chain: &str,
    client_id: u32,
    key: Option<&[u8]>,
    channel: &CommChannel,
) -> NotifResult<usize> {
    let mut request = NotifChainElem::new(client_id, channel.clone()).with_opcode(Opcode::Unsubscribe);
    if let Some(key) = key {
        request = request.with_key(bytes::Bytes::copy_from_slice(key));
    }
    db.unsubscribe(chain, &request)
}

/// Turn a received frame into a notification
pub fn decode_notification(frame: &[u8]) -> NotifResult<Notification> {
    let (chain, elem) = deserialize(frame)?;
    Ok(Notification::from_elem(&Arc::from(chain.as_str()), &elem))
}

/// Bind a UDP listener that decodes notifications sent by a publisher
pub async fn udp_notification_listener<F>(config: &UdpConfig, on_notification: F) -> NotifResult<UdpServer>
where
    F: Fn(Notification) + Send + Sync + 'static,
{
    let server = UdpServer::start(config, move |frame: &[u8], sender: SocketAddr, _: &Arc<tokio::net::UdpSocket>| {
        match decode_notification(frame) {
            Ok(notification) => on_notification(notification),
            Err(e) => warn!(peer = %sender, error = %e, "Discarding undecodable notification"),
        }
    })
    .await?;
    Ok(server)
}

enum RequestPath {
    Udp,
    Tcp(TcpClient),
}

/// Client of a remote publisher
pub struct RemoteSubscriber {
    client_id: u32,
    publisher: SocketAddr,
    path: RequestPath,
}

impl RemoteSubscriber {
    /// Requests go out as datagrams; notifications arrive wherever the
    /// subscription's channel points
    pub fn udp(client_id: u32, publisher: SocketAddr) -> Self {
        Self {
            client_id,
            publisher,
            path: RequestPath::Udp,
        }
    }

    /// Connect to the publisher's TCP listener
    pub async fn tcp(client_id: u32, publisher: SocketAddr) -> NotifResult<Self> {
        let client = tcp_connect(publisher).await?;
        Ok(Self {
            client_id,
            publisher,
            path: RequestPath::Tcp(client),
        })
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn protocol(&self) -> Protocol {
        match self.path {
            RequestPath::Udp => Protocol::Udp,
            RequestPath::Tcp(_) => Protocol::Tcp,
        }
    }

    /// Local end of the TCP connection, the address notifications return to
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        match &self.path {
            RequestPath::Tcp(client) => Some(client.local_addr()),
            RequestPath::Udp => None,
        }
    }

    fn tcp_channel(&self) -> NotifResult<CommChannel> {
        match self.tcp_local_addr() {
            Some(SocketAddr::V4(local)) => Ok(CommChannel::inet(local, Protocol::Tcp)),
            Some(SocketAddr::V6(local)) => Err(NotifError::Config(format!(
                "TCP subscriptions need an IPv4 connection, got {}",
                local
            ))),
            None => Err(NotifError::Config(
                "TCP subscription over a UDP subscriber".to_string(),
            )),
        }
    }

    fn request(&self, opcode: Opcode, channel: CommChannel, key: Option<&[u8]>) -> NotifChainElem {
        let elem = NotifChainElem::new(self.client_id, channel).with_opcode(opcode);
        match key {
            Some(key) => elem.with_key(bytes::Bytes::copy_from_slice(key)),
            None => elem,
        }
    }

    async fn send(&self, chain: &str, elem: &NotifChainElem) -> NotifResult<()> {
        let frame = serialize(chain, elem)?;
        let sent = match &self.path {
            RequestPath::Udp => send_udp_msg(self.publisher, &frame, None).await?,
            RequestPath::Tcp(client) => client.send(&frame).await?,
        };
        debug!(
            chain,
            client_id = self.client_id,
            opcode = %elem.opcode,
            publisher = %self.publisher,
            bytes = sent,
            "Request sent"
        );
        Ok(())
    }

    /// Notifications go to `notify` over UDP; an unspecified ip is replaced
    /// by the address the publisher sees this request from
    pub async fn subscribe_udp(&self, chain: &str, key: Option<&[u8]>, notify: SocketAddrV4) -> NotifResult<()> {
        let channel = CommChannel::inet(notify, Protocol::Udp);
        self.send(chain, &self.request(Opcode::Subscribe, channel, key)).await
    }

    pub async fn unsubscribe_udp(&self, chain: &str, key: Option<&[u8]>, notify: SocketAddrV4) -> NotifResult<()> {
        let channel = CommChannel::inet(notify, Protocol::Udp);
        self.send(chain, &self.request(Opcode::Unsubscribe, channel, key)).await
    }

    /// Notifications come back over this subscriber's TCP connection
    pub async fn subscribe_tcp(&self, chain: &str, key: Option<&[u8]>) -> NotifResult<()> {
        let channel = self.tcp_channel()?;
        self.send(chain, &self.request(Opcode::Subscribe, channel, key)).await
    }

    pub async fn unsubscribe_tcp(&self, chain: &str, key: Option<&[u8]>) -> NotifResult<()> {
        let channel = self.tcp_channel()?;
        self.send(chain, &self.request(Opcode::Unsubscribe, channel, key)).await
    }

    /// Notifications arrive as datagrams on a UNIX socket path (at most 32 bytes)
    pub async fn subscribe_unix(&self, chain: &str, key: Option<&[u8]>, path: &str) -> NotifResult<()> {
        self.send(chain, &self.request(Opcode::Subscribe, CommChannel::unix(path), key))
            .await
    }

    pub async fn subscribe_msgq(&self, chain: &str, key: Option<&[u8]>, queue: &str) -> NotifResult<()> {
        self.send(chain, &self.request(Opcode::Subscribe, CommChannel::message_queue(queue), key))
            .await
    }

    /// Drop every subscription of this client on `chain`
    pub async fn unsubscribe_all(&self, chain: &str) -> NotifResult<()> {
        self.send(chain, &self.request(Opcode::ClientUnsubscribeAll, CommChannel::Any, None))
            .await
    }

    /// Ask the publisher to replay its data set on `chain`
    pub async fn request_notify_all(&self, chain: &str) -> NotifResult<()> {
        self.send(chain, &self.request(Opcode::NotifyAll, CommChannel::Any, None))
            .await
    }

    /// Deliver notifications arriving on the TCP connection to
    /// `on_notification`, from a background task
    pub fn listen_for_notifications<F>(&mut self, on_notification: F) -> NotifResult<()>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let RequestPath::Tcp(client) = &mut self.path else {
            return Err(NotifError::Config(
                "UDP subscribers receive through udp_notification_listener".to_string(),
            ));
        };

        let publisher = self.publisher;
        client.listen_after_connect(move |frame| match decode_notification(frame) {
            Ok(notification) => on_notification(notification),
            Err(e) => warn!(peer = %publisher, error = %e, "Discarding undecodable notification"),
        })?;
        Ok(())
    }

    /// Close the TCP connection, if any
    pub async fn disconnect(self) -> NotifResult<()> {
        if let RequestPath::Tcp(client) = self.path {
            client.disconnect(None).await?;
        }
        info!(client_id = self.client_id, publisher = %self.publisher, "Subscriber disconnected");
        Ok(())
    }
}
