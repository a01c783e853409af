//! # Notification Chain Codec
//!
//! ## Purpose
//!
//! Wire-level building blocks shared by publishers and subscribers:
//! - TLV record writer/reader ([`tlv`])
//! - Record type numbers, opcodes, channel kinds and fixed sizes ([`wire`])
//! - Codec error type ([`ProtocolError`])
//!
//! ## Architecture Role
//!
//! ```text
//! notif-codec → notif-network → notif-chain
//!     ↑               ↓               ↓
//! TLV records    UDP/TCP bytes    Chain engine
//! ```
//!
//! This crate knows nothing about chains or sockets. Mapping a chain element
//! onto records lives in `notif-chain`; moving bytes lives in `notif-network`.

pub mod error;
pub mod tlv;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use tlv::{find_tlv, insert_tlv, iterate, put_tlv, TlvIter, TlvRecord};
pub use wire::{
    ChannelKind, Opcode, Protocol, TlvType, DEFAULT_PUBLISHER_TCP_PORT, DEFAULT_PUBLISHER_UDP_PORT,
    NOTIF_NAME_SIZE, TLV_MAX_VALUE_LEN, TLV_OVERHEAD,
};
