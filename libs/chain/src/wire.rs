//! Element ⇄ TLV message mapping
//!
//! Every message carries the chain name, client id and opcode. Channel
//! records follow the channel kind:
//!
//! | kind            | records                                 |
//! |-----------------|-----------------------------------------|
//! | message queue   | channel type, channel name              |
//! | unix socket     | channel type, channel name              |
//! | inet socket     | channel type, ip, port, protocol        |
//! | any             | channel type                            |
//! | callback/unknown| none                                    |
//!
//! Key and payload records are present only when non-empty.

use crate::channel::{CommChannel, InetChannel};
use crate::elem::NotifChainElem;
use crate::error::{NotifError, NotifResult};
use bytes::Bytes;
use notif_codec::tlv::{insert_tlv, iterate, pad_name, unpad_name, TlvRecord};
use notif_codec::{ChannelKind, Opcode, Protocol, ProtocolError, TlvType, NOTIF_NAME_SIZE, TLV_OVERHEAD};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Exact encoded size of `elem`
pub fn encoded_len(elem: &NotifChainElem) -> usize {
    let mut len = TlvType::ChainName.record_len(NOTIF_NAME_SIZE)
        + TlvType::ClientId.record_len(4)
        + TlvType::Opcode.record_len(1);

    len += match elem.channel.as_ref() {
        CommChannel::MessageQueue { .. } | CommChannel::UnixSocket { .. } => {
            TlvType::ChannelType.record_len(1) + TlvType::ChannelName.record_len(NOTIF_NAME_SIZE)
        }
        CommChannel::InetSocket(_) => {
            TlvType::ChannelType.record_len(1)
                + TlvType::IpAddr.record_len(4)
                + TlvType::PortNo.record_len(2)
                + TlvType::ProtocolNo.record_len(1)
        }
        CommChannel::Any => TlvType::ChannelType.record_len(1),
        CommChannel::Callback(_) | CommChannel::Unknown => 0,
    };

    if let Some(key) = elem.key_bytes() {
        len += TlvType::AppKeyData.record_len(key.len());
    }
    if let Some(payload) = elem.payload_bytes() {
        len += TlvType::AppDataToNotify.record_len(payload.len());
    }
    len
}

fn put<'a>(cursor: &'a mut [u8], tlv_type: TlvType, value: &[u8]) -> NotifResult<&'a mut [u8]> {
    Ok(insert_tlv(cursor, tlv_type.as_u8(), value)?)
}

/// Encode into a caller-provided buffer, returning the bytes written
pub fn serialize_into(chain_name: &str, elem: &NotifChainElem, buf: &mut [u8]) -> NotifResult<usize> {
    let total = buf.len();
    let need = encoded_len(elem);
    if total < need {
        return Err(ProtocolError::buffer_too_small(need, total, "notification message").into());
    }

    let name = pad_name(TlvType::ChainName.as_u8(), chain_name)?;
    let mut cursor = put(buf, TlvType::ChainName, &name)?;
    cursor = put(cursor, TlvType::ClientId, &elem.client_id.to_le_bytes())?;
    cursor = put(cursor, TlvType::Opcode, &[u8::from(elem.opcode)])?;

    let kind = [u8::from(elem.channel.kind())];
    match elem.channel.as_ref() {
        CommChannel::MessageQueue { name: channel_name } | CommChannel::UnixSocket { path: channel_name } => {
            let padded = pad_name(TlvType::ChannelName.as_u8(), channel_name)?;
            cursor = put(cursor, TlvType::ChannelType, &kind)?;
            cursor = put(cursor, TlvType::ChannelName, &padded)?;
        }
        CommChannel::InetSocket(inet) => {
            cursor = put(cursor, TlvType::ChannelType, &kind)?;
            cursor = put(cursor, TlvType::IpAddr, &inet.ip.octets())?;
            cursor = put(cursor, TlvType::PortNo, &inet.port.to_be_bytes())?;
            cursor = put(cursor, TlvType::ProtocolNo, &[u8::from(inet.protocol)])?;
        }
        CommChannel::Any => {
            cursor = put(cursor, TlvType::ChannelType, &kind)?;
        }
        CommChannel::Callback(_) | CommChannel::Unknown => {}
    }

    if let Some(key) = elem.key_bytes() {
        cursor = put(cursor, TlvType::AppKeyData, key)?;
    }
    if let Some(payload) = elem.payload_bytes() {
        cursor = put(cursor, TlvType::AppDataToNotify, payload)?;
    }

    Ok(total - cursor.len())
}

/// Encode into a fresh buffer
pub fn serialize(chain_name: &str, elem: &NotifChainElem) -> NotifResult<Bytes> {
    let mut buf = vec![0u8; encoded_len(elem)];
    let written = serialize_into(chain_name, elem, &mut buf)?;
    buf.truncate(written);
    Ok(Bytes::from(buf))
}

fn fixed<const N: usize>(tlv_type: TlvType, value: &[u8]) -> NotifResult<[u8; N]> {
    value.try_into().map_err(|_| {
        ProtocolError::PayloadSizeMismatch {
            tlv_type: tlv_type.as_u8(),
            expected: N,
            got: value.len(),
        }
        .into()
    })
}

fn require<T>(value: Option<T>, tlv_type: TlvType, field: &'static str) -> NotifResult<T> {
    value.ok_or_else(|| {
        ProtocolError::MissingTlv {
            tlv_type: tlv_type.as_u8(),
            field,
        }
        .into()
    })
}

fn set_once<T>(slot: &mut Option<T>, value: T, record: &TlvRecord<'_>) -> NotifResult<()> {
    if slot.is_some() {
        return Err(ProtocolError::DuplicateTlv {
            tlv_type: record.tlv_type,
            offset: record.offset,
        }
        .into());
    }
    *slot = Some(value);
    Ok(())
}

fn non_empty(value: &[u8]) -> Option<Bytes> {
    if value.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(value))
    }
}

/// Split a buffer of back-to-back messages at each chain name record
///
/// A stream read may carry several requests. Splitting stops at the first
/// malformed record, which starts the last message so decoding it reports
/// the error without taking the earlier requests down with it.
pub fn split_messages(buf: &[u8]) -> Vec<&[u8]> {
    let mut messages = Vec::new();
    let mut start = 0;
    let mut good_end = 0;
    for record in iterate(buf) {
        let Ok(record) = record else {
            if good_end > start {
                messages.push(&buf[start..good_end]);
                start = good_end;
            }
            break;
        };
        if record.tlv_type == TlvType::ChainName.as_u8() && record.offset > start {
            messages.push(&buf[start..record.offset]);
            start = record.offset;
        }
        good_end = record.offset + TLV_OVERHEAD + record.len();
    }
    if start < buf.len() {
        messages.push(&buf[start..]);
    }
    messages
}

/// Decode a message into its chain name and element
///
/// Records of unknown type are skipped. A missing channel type decodes as
/// [`CommChannel::Any`]. Chain name, client id and opcode must appear once.
pub fn deserialize(buf: &[u8]) -> NotifResult<(String, NotifChainElem)> {
    let mut chain_name = None;
    let mut client_id = None;
    let mut opcode = None;
    let mut kind = None;
    let mut channel_name = None;
    let mut ip = None;
    let mut port = None;
    let mut protocol = None;
    let mut key = None;
    let mut payload = None;

    for record in iterate(buf) {
        let record = record?;
        let Ok(tlv_type) = TlvType::try_from(record.tlv_type) else {
            debug!(tlv_type = record.tlv_type, offset = record.offset, "Skipping unknown TLV");
            continue;
        };

        if let Some(expected) = tlv_type.fixed_len() {
            if record.len() != expected {
                return Err(ProtocolError::PayloadSizeMismatch {
                    tlv_type: record.tlv_type,
                    expected,
                    got: record.len(),
                }
                .into());
            }
        }

        let value = record.value;
        match tlv_type {
            TlvType::ChainName => set_once(&mut chain_name, unpad_name(record.tlv_type, value)?, &record)?,
            TlvType::ClientId => set_once(&mut client_id, u32::from_le_bytes(fixed(tlv_type, value)?), &record)?,
            TlvType::Opcode => {
                let decoded = Opcode::try_from(value[0]).map_err(|_| ProtocolError::InvalidValue {
                    field: "opcode",
                    value: value[0],
                })?;
                set_once(&mut opcode, decoded, &record)?
            }
            TlvType::ChannelType => {
                kind = Some(ChannelKind::try_from(value[0]).map_err(|_| ProtocolError::InvalidValue {
                    field: "channel type",
                    value: value[0],
                })?)
            }
            TlvType::ChannelName => channel_name = Some(unpad_name(record.tlv_type, value)?),
            TlvType::IpAddr => ip = Some(Ipv4Addr::from(fixed::<4>(tlv_type, value)?)),
            TlvType::PortNo => port = Some(u16::from_be_bytes(fixed(tlv_type, value)?)),
            TlvType::ProtocolNo => {
                protocol = Some(Protocol::try_from(value[0]).map_err(|_| ProtocolError::InvalidValue {
                    field: "protocol",
                    value: value[0],
                })?)
            }
            TlvType::AppKeyData => key = non_empty(value),
            TlvType::AppDataToNotify => payload = non_empty(value),
        }
    }

    let chain_name = require(chain_name, TlvType::ChainName, "chain name")?;
    let client_id = require(client_id, TlvType::ClientId, "client id")?;
    let opcode = require(opcode, TlvType::Opcode, "opcode")?;

    let channel = match kind.unwrap_or(ChannelKind::Any) {
        ChannelKind::Any => CommChannel::Any,
        ChannelKind::Unknown => CommChannel::Unknown,
        ChannelKind::Callback => {
            return Err(NotifError::protocol_violation(
                "callback channels cannot be requested over the wire",
            ))
        }
        ChannelKind::MessageQueue => CommChannel::MessageQueue {
            name: require(channel_name, TlvType::ChannelName, "queue name")?,
        },
        ChannelKind::UnixSocket => CommChannel::UnixSocket {
            path: require(channel_name, TlvType::ChannelName, "socket path")?,
        },
        ChannelKind::InetSocket => CommChannel::InetSocket(InetChannel::new(
            require(ip, TlvType::IpAddr, "ip address")?,
            require(port, TlvType::PortNo, "port")?,
            require(protocol, TlvType::ProtocolNo, "protocol")?,
        )),
    };

    Ok((
        chain_name,
        NotifChainElem {
            client_id,
            opcode,
            key,
            payload,
            channel: Arc::new(channel),
        },
    ))
}
