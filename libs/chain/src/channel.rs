//! Communication channels and their per-client sharing
//!
//! A channel says how a subscriber is reached. Elements of the same client
//! that name an identical channel share one `Arc<CommChannel>`, resolved
//! through [`ChannelDirectory::record_channel_per_client`]; the strong count
//! of that `Arc` is the number of live subscriptions using it. The channel
//! goes away with its last subscription. Transport sockets referenced by a
//! channel's link are owned by the transport layer and are never closed
//! here.

use crate::elem::Notification;
use notif_codec::{ChannelKind, Protocol};
use notif_network::PeerLink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use tracing::debug;

/// In-process subscriber callback, invoked synchronously by `invoke`
pub type AppCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Network endpoint of a remote subscriber
#[derive(Debug, Clone)]
pub struct InetChannel {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub protocol: Protocol,
    /// Socket the subscription arrived on; notifications leave through it
    pub link: Option<PeerLink>,
}

impl InetChannel {
    pub fn new(ip: Ipv4Addr, port: u16, protocol: Protocol) -> Self {
        Self {
            ip,
            port,
            protocol,
            link: None,
        }
    }

    pub fn from_addr(addr: SocketAddrV4, protocol: Protocol) -> Self {
        Self::new(*addr.ip(), addr.port(), protocol)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }

    fn same_endpoint(&self, other: &InetChannel) -> bool {
        self.ip == other.ip && self.port == other.port && self.protocol == other.protocol
    }
}

#[derive(Clone)]
pub enum CommChannel {
    Callback(AppCallback),
    MessageQueue { name: String },
    UnixSocket { path: String },
    InetSocket(InetChannel),
    /// Wildcard filter for unsubscribe requests
    Any,
    Unknown,
}

impl CommChannel {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    pub fn inet(addr: SocketAddrV4, protocol: Protocol) -> Self {
        Self::InetSocket(InetChannel::from_addr(addr, protocol))
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self::UnixSocket { path: path.into() }
    }

    pub fn message_queue(name: impl Into<String>) -> Self {
        Self::MessageQueue { name: name.into() }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Callback(_) => ChannelKind::Callback,
            Self::MessageQueue { .. } => ChannelKind::MessageQueue,
            Self::UnixSocket { .. } => ChannelKind::UnixSocket,
            Self::InetSocket(_) => ChannelKind::InetSocket,
            Self::Any => ChannelKind::Any,
            Self::Unknown => ChannelKind::Unknown,
        }
    }

    /// Whether notifications can be dispatched through this channel
    pub fn can_deliver(&self) -> bool {
        !matches!(self, Self::Any | Self::Unknown)
    }

    /// Channel equality used for sharing and unsubscribe filtering
    ///
    /// `Any` matches everything. Callbacks match only the same callback
    /// instance; inet channels match on ip, port and protocol (the link is
    /// not part of the identity).
    pub fn matches(&self, other: &CommChannel) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Callback(a), Self::Callback(b)) => Arc::ptr_eq(a, b),
            (Self::MessageQueue { name: a }, Self::MessageQueue { name: b }) => a == b,
            (Self::UnixSocket { path: a }, Self::UnixSocket { path: b }) => a == b,
            (Self::InetSocket(a), Self::InetSocket(b)) => a.same_endpoint(b),
            (Self::Unknown, Self::Unknown) => true,
            _ => false,
        }
    }

    pub fn inet_channel(&self) -> Option<&InetChannel> {
        match self {
            Self::InetSocket(inet) => Some(inet),
            _ => None,
        }
    }
}

impl fmt::Debug for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(cb) => write!(f, "Callback({:p})", Arc::as_ptr(cb)),
            Self::MessageQueue { name } => write!(f, "MessageQueue({})", name),
            Self::UnixSocket { path } => write!(f, "UnixSocket({})", path),
            Self::InetSocket(inet) => write!(
                f,
                "InetSocket({}:{}/{}{})",
                inet.ip,
                inet.port,
                inet.protocol,
                if inet.link.is_some() { ", linked" } else { "" }
            ),
            Self::Any => f.write_str("Any"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

impl fmt::Display for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("callback"),
            Self::MessageQueue { name } => write!(f, "mq:{}", name),
            Self::UnixSocket { path } => write!(f, "unix:{}", path),
            Self::InetSocket(inet) => write!(f, "{}://{}:{}", inet.protocol, inet.ip, inet.port),
            Self::Any => f.write_str("any"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Per-client index of live channels
///
/// Holds weak references only, so it never keeps a channel alive on its own.
#[derive(Default)]
pub struct ChannelDirectory {
    by_client: Mutex<HashMap<u32, Vec<Weak<CommChannel>>>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client's existing channel matching `template`, or install
    /// `template` as a new shared channel
    pub fn record_channel_per_client(&self, client_id: u32, template: CommChannel) -> Arc<CommChannel> {
        let mut by_client = self.by_client.lock();
        let entries = by_client.entry(client_id).or_default();
        entries.retain(|weak| weak.strong_count() > 0);

        if let Some(existing) = entries
            .iter()
            .filter_map(Weak::upgrade)
            .find(|channel| channel.matches(&template))
        {
            debug!(
                client_id,
                channel = %existing,
                refs = Arc::strong_count(&existing) - 1,
                "Sharing existing channel"
            );
            return existing;
        }

        let shared = Arc::new(template);
        entries.push(Arc::downgrade(&shared));
        debug!(client_id, channel = %shared, "Recorded new channel");
        shared
    }

    /// Number of subscriptions holding the client's channel matching `template`
    pub fn ref_count(&self, client_id: u32, template: &CommChannel) -> usize {
        let by_client = self.by_client.lock();
        by_client
            .get(&client_id)
            .into_iter()
            .flatten()
            .filter(|weak| weak.upgrade().map(|c| c.matches(template)).unwrap_or(false))
            .map(Weak::strong_count)
            .next()
            .unwrap_or(0)
    }

    /// Live channels recorded for the client
    pub fn channel_count(&self, client_id: u32) -> usize {
        let mut by_client = self.by_client.lock();
        let Some(entries) = by_client.get_mut(&client_id) else {
            return 0;
        };
        entries.retain(|weak| weak.strong_count() > 0);
        let live = entries.len();
        if live == 0 {
            by_client.remove(&client_id);
        }
        live
    }

    /// Drop index entries whose channels were released
    pub fn prune(&self) {
        let mut by_client = self.by_client.lock();
        by_client.retain(|_, entries| {
            entries.retain(|weak| weak.strong_count() > 0);
            !entries.is_empty()
        });
    }

    pub fn client_count(&self) -> usize {
        self.prune();
        self.by_client.lock().len()
    }
}
