//! # Notification Chains
//!
//! Publish/subscribe engine: a publisher keeps named chains of subscriber
//! elements and, when its data source changes, notifies every subscriber
//! whose key matches the event.
//!
//! ```text
//! subscriber ──SUBSCRIBE (TLV)──▶ Publisher ──▶ NotifChainDb::process_remote_subscriber_request
//!                                                 │
//! application event ──▶ NotifChainDb::invoke ─────┴─▶ callback / UDP / TCP / UNIX datagram
//! ```
//!
//! Elements of one client that name the same channel share it through the
//! registry's [`ChannelDirectory`]. Delivery is at-most-once.

pub mod chain;
pub mod channel;
pub mod config;
mod dispatch;
pub mod elem;
pub mod error;
pub mod publisher;
pub mod registry;
pub mod remote;
pub mod subscriber;
pub mod wire;

pub use chain::{InvokeReport, KeyComparator, KeyPrinter, NotifChain};
pub use channel::{AppCallback, ChannelDirectory, CommChannel, InetChannel};
pub use config::{ChainSettings, EngineSettings, NotifConfig, PublisherSettings};
pub use elem::{NotifChainElem, Notification};
pub use error::{NotifError, NotifResult};
pub use publisher::{Publisher, ReplayHandler};
pub use registry::NotifChainDb;
pub use remote::{RemoteOutcome, RemoteSender};
pub use subscriber::{
    decode_notification, subscribe_by_callback, udp_notification_listener, unsubscribe_by_callback,
    RemoteSubscriber,
};
pub use wire::{deserialize, encoded_len, serialize, serialize_into, split_messages};

pub use notif_codec::{ChannelKind, Opcode, Protocol};
