//! Requests arriving from remote subscribers

use crate::channel::CommChannel;
use crate::elem::NotifChainElem;
use crate::error::{NotifError, NotifResult};
use crate::registry::NotifChainDb;
use crate::wire::deserialize;
use notif_codec::{Opcode, Protocol};
use notif_network::PeerLink;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a request came from
#[derive(Debug, Clone)]
pub struct RemoteSender {
    pub addr: SocketAddr,
    /// Socket the request arrived on
    pub link: Option<PeerLink>,
}

impl RemoteSender {
    pub fn new(addr: SocketAddr, link: Option<PeerLink>) -> Self {
        Self { addr, link }
    }
}

/// What a processed request did
#[derive(Debug)]
pub enum RemoteOutcome {
    Subscribed { chain: String, client_id: u32 },
    Unsubscribed { chain: String, client_id: u32, removed: usize },
    UnsubscribedAll { chain: String, client_id: u32, removed: usize },
    /// The subscriber asks for a replay of the current data set; the
    /// application owning the data source answers it
    NotifyAllRequested { chain: String, request: NotifChainElem },
}

/// Fill in what the subscriber could not know: its address as seen by us
/// and the socket to answer on
fn bind_to_sender(elem: &mut NotifChainElem, sender: &RemoteSender) {
    let channel = Arc::make_mut(&mut elem.channel);
    let CommChannel::InetSocket(inet) = channel else {
        return;
    };

    if inet.ip.is_unspecified() {
        if let IpAddr::V4(ip) = sender.addr.ip() {
            inet.ip = ip;
        }
    }

    inet.link = match (&sender.link, inet.protocol) {
        (Some(link @ PeerLink::Udp(_)), Protocol::Udp) | (Some(link @ PeerLink::Tcp(_)), Protocol::Tcp) => {
            Some(link.clone())
        }
        _ => None,
    };
}

impl NotifChainDb {
    /// Decode one subscriber request and apply it
    ///
    /// `buf` must hold exactly one message; see
    /// [`split_messages`](crate::wire::split_messages) for stream reads.
    ///
    /// Publisher-side opcodes (CREATE, UPDATE, DELETE) and callback channels
    /// are protocol violations. Whatever the request does not leave
    /// registered is dropped before returning.
    pub fn process_remote_subscriber_request(&self, buf: &[u8], sender: &RemoteSender) -> NotifResult<RemoteOutcome> {
        let (chain, mut elem) = deserialize(buf)?;
        debug!(
            chain = %chain,
            client_id = elem.client_id,
            opcode = %elem.opcode,
            peer = %sender.addr,
            "Remote subscriber request"
        );

        if elem.opcode.is_publisher_event() {
            return Err(NotifError::protocol_violation(format!(
                "subscriber {} sent publisher opcode {}",
                sender.addr, elem.opcode
            )));
        }

        bind_to_sender(&mut elem, sender);
        let client_id = elem.client_id;

        match elem.opcode {
            Opcode::Subscribe => {
                self.subscribe(&chain, elem)?;
                Ok(RemoteOutcome::Subscribed { chain, client_id })
            }
            Opcode::Unsubscribe => {
                let removed = self.unsubscribe(&chain, &elem)?;
                Ok(RemoteOutcome::Unsubscribed {
                    chain,
                    client_id,
                    removed,
                })
            }
            Opcode::ClientUnsubscribeAll => {
                let removed = self.unsubscribe_all(&chain, client_id, &elem.channel)?;
                info!(chain = %chain, client_id, removed, peer = %sender.addr, "Client unsubscribed all");
                Ok(RemoteOutcome::UnsubscribedAll {
                    chain,
                    client_id,
                    removed,
                })
            }
            Opcode::NotifyAll => {
                if self.lookup(&chain).is_none() {
                    return Err(NotifError::UnknownChain { name: chain });
                }
                Ok(RemoteOutcome::NotifyAllRequested { chain, request: elem })
            }
            opcode => Err(NotifError::UnexpectedOpcode { opcode }),
        }
    }
}
