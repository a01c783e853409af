//! Wire vocabulary: TLV type numbers, opcodes, channel kinds and sizes
//!
//! The numeric values are the on-the-wire contract between publishers and
//! subscribers and must not be renumbered.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Size of every record header (type byte + length byte)
pub const TLV_OVERHEAD: usize = 2;

/// Largest value a single record can carry
pub const TLV_MAX_VALUE_LEN: usize = u8::MAX as usize;

/// Fixed width of chain names and channel names on the wire
pub const NOTIF_NAME_SIZE: usize = 32;

/// Default publisher UDP port
pub const DEFAULT_PUBLISHER_UDP_PORT: u16 = 2000;

/// Default publisher TCP port
pub const DEFAULT_PUBLISHER_TCP_PORT: u16 = 2002;

/// Record types used by notification messages
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum TlvType {
    /// Chain name, NUL padded to [`NOTIF_NAME_SIZE`]
    ChainName = 1,
    /// Subscriber id, 4 bytes little-endian
    ClientId = 2,
    /// [`ChannelKind`], 1 byte
    ChannelType = 3,
    /// Message queue name or UNIX socket path, NUL padded
    ChannelName = 4,
    /// IPv4 address in network order
    IpAddr = 5,
    /// Port in network order
    PortNo = 6,
    /// [`Opcode`], 1 byte
    Opcode = 7,
    /// [`Protocol`], 1 byte
    ProtocolNo = 8,
    /// Application key, variable
    AppKeyData = 9,
    /// Application payload, variable
    AppDataToNotify = 10,
}

impl TlvType {
    /// Required value length for fixed-size records
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::ChainName | Self::ChannelName => Some(NOTIF_NAME_SIZE),
            Self::ClientId | Self::IpAddr => Some(4),
            Self::PortNo => Some(2),
            Self::ChannelType | Self::Opcode | Self::ProtocolNo => Some(1),
            Self::AppKeyData | Self::AppDataToNotify => None,
        }
    }

    /// Encoded size of a record of this type carrying `value_len` bytes
    pub const fn record_len(self, value_len: usize) -> usize {
        TLV_OVERHEAD
            + match self.fixed_len() {
                Some(len) => len,
                None => value_len,
            }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Event or request carried by a message
///
/// CREATE/UPDATE/DELETE flow publisher → subscriber; SUBSCRIBE through
/// CLIENT_UNSUBSCRIBE_ALL flow subscriber → publisher.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Opcode {
    Create = 0,
    Update = 1,
    Delete = 2,
    Subscribe = 3,
    Unsubscribe = 4,
    NotifyAll = 5,
    ClientUnsubscribeAll = 6,
    Unknown = 7,
}

impl Opcode {
    /// True for the event opcodes only a publisher may emit
    pub const fn is_publisher_event(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }

    /// True for the request opcodes a subscriber sends
    pub const fn is_subscriber_request(self) -> bool {
        matches!(
            self,
            Self::Subscribe | Self::Unsubscribe | Self::NotifyAll | Self::ClientUnsubscribeAll
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::NotifyAll => "NOTIFY_ALL",
            Self::ClientUnsubscribeAll => "CLIENT_UNSUBSCRIBE_ALL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Delivery mechanism advertised in a [`TlvType::ChannelType`] record
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ChannelKind {
    /// Wildcard, only meaningful as an unsubscribe filter
    Any = 0,
    Callback = 1,
    MessageQueue = 2,
    UnixSocket = 3,
    InetSocket = 4,
    Unknown = 5,
}

/// Transport protocol of an inet channel, using IANA protocol numbers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}
