//! Notification chain errors
//!
//! Registry misuse (unknown chain, duplicate subscription) is recoverable and
//! reported to the caller. Wire and socket failures wrap the codec and
//! transport errors.

use notif_codec::{ChannelKind, Opcode, ProtocolError};
use notif_network::TransportError;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifError {
    #[error("Notification chain '{name}' already exists")]
    ChainAlreadyExists { name: String },

    #[error("Unknown notification chain '{name}'")]
    UnknownChain { name: String },

    #[error("Chain name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("Client {client_id} is already subscribed to '{chain}' with an equal key")]
    DuplicateSubscription { chain: String, client_id: u32 },

    /// Wildcard and unknown channels can filter but cannot deliver
    #[error("Channel kind {kind:?} cannot receive notifications")]
    InvalidChannel { kind: ChannelKind },

    #[error("Key of {len} bytes exceeds limit of {max}")]
    KeyTooLong { len: usize, max: usize },

    /// Request that a subscriber is never allowed to send
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("Opcode {opcode} is not a subscriber request")]
    UnexpectedOpcode { opcode: Opcode },

    #[error("No TCP connection to reach subscriber at {addr}")]
    NoTcpLink { addr: SocketAddr },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NotifError {
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation { reason: reason.into() }
    }

    /// Short label for structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.category(),
            Self::Protocol(_) => "protocol",
            Self::ProtocolViolation { .. } | Self::UnexpectedOpcode { .. } => "violation",
            Self::NoTcpLink { .. } => "no_link",
            Self::Config(_) => "config",
            _ => "rejected",
        }
    }

    /// Caller errors that leave the registry untouched
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ChainAlreadyExists { .. }
                | Self::UnknownChain { .. }
                | Self::NameTooLong { .. }
                | Self::DuplicateSubscription { .. }
                | Self::InvalidChannel { .. }
                | Self::KeyTooLong { .. }
        )
    }
}

pub type NotifResult<T> = std::result::Result<T, NotifError>;
