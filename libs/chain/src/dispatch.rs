//! Delivery of one stamped element through its channel

use crate::channel::{CommChannel, InetChannel};
use crate::elem::{NotifChainElem, Notification};
use crate::error::{NotifError, NotifResult};
use crate::wire::serialize;
use notif_codec::Protocol;
use notif_network::{PeerLink, Transport, UdpTarget, UnixDatagramTarget};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No delivery mechanism for this channel kind
    Skipped,
}

fn inet_transport(inet: &InetChannel) -> NotifResult<Box<dyn Transport>> {
    match (inet.protocol, &inet.link) {
        (Protocol::Udp, Some(PeerLink::Udp(socket))) => Ok(Box::new(UdpTarget {
            dest: inet.addr(),
            socket: Some(socket.clone()),
        })),
        (Protocol::Udp, _) => Ok(Box::new(UdpTarget {
            dest: inet.addr(),
            socket: None,
        })),
        (Protocol::Tcp, Some(PeerLink::Tcp(link))) => Ok(Box::new(link.clone())),
        (Protocol::Tcp, _) => Err(NotifError::NoTcpLink { addr: inet.addr() }),
    }
}

pub(crate) async fn deliver(chain: &Arc<str>, elem: &NotifChainElem) -> NotifResult<Delivery> {
    let transport: Box<dyn Transport> = match elem.channel.as_ref() {
        CommChannel::Callback(callback) => {
            callback(&Notification::from_elem(chain, elem));
            return Ok(Delivery::Delivered);
        }
        CommChannel::InetSocket(inet) => inet_transport(inet)?,
        CommChannel::UnixSocket { path } => Box::new(UnixDatagramTarget::new(path)),
        CommChannel::MessageQueue { name } => {
            warn!(chain = %chain, client_id = elem.client_id, queue = %name, "Message queue delivery is not supported");
            return Ok(Delivery::Skipped);
        }
        CommChannel::Any | CommChannel::Unknown => {
            warn!(chain = %chain, client_id = elem.client_id, channel = %elem.channel, "Element has no deliverable channel");
            return Ok(Delivery::Skipped);
        }
    };

    let frame = serialize(chain, elem)?;
    let sent = transport.send(&frame).await?;
    debug!(
        chain = %chain,
        client_id = elem.client_id,
        destination = %transport.destination(),
        bytes = sent,
        "Notification sent"
    );
    Ok(Delivery::Delivered)
}
