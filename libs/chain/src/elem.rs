use crate::channel::CommChannel;
use bytes::Bytes;
use notif_codec::Opcode;
use std::sync::Arc;

/// One subscription: who, for which key, reached how
///
/// The same type doubles as the event passed to `invoke` (only opcode, key
/// and payload are read) and as the decoded form of a wire message.
#[derive(Debug, Clone)]
pub struct NotifChainElem {
    pub client_id: u32,
    pub opcode: Opcode,
    /// Absent key acts as a wildcard
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub channel: Arc<CommChannel>,
}

fn non_empty(bytes: Bytes) -> Option<Bytes> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

impl NotifChainElem {
    pub fn new(client_id: u32, channel: CommChannel) -> Self {
        Self {
            client_id,
            opcode: Opcode::Unknown,
            key: None,
            payload: None,
            channel: Arc::new(channel),
        }
    }

    /// Event to pass to `invoke`
    pub fn event(opcode: Opcode, key: Option<&[u8]>, payload: Option<&[u8]>) -> Self {
        Self {
            client_id: 0,
            opcode,
            key: key.map(Bytes::copy_from_slice).and_then(non_empty),
            payload: payload.map(Bytes::copy_from_slice).and_then(non_empty),
            channel: Arc::new(CommChannel::Unknown),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = non_empty(key.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = non_empty(payload.into());
        self
    }

    pub fn with_opcode(mut self, opcode: Opcode) -> Self {
        self.opcode = opcode;
        self
    }

    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub chain: Arc<str>,
    pub client_id: u32,
    pub opcode: Opcode,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
}

impl Notification {
    pub(crate) fn from_elem(chain: &Arc<str>, elem: &NotifChainElem) -> Self {
        Self {
            chain: chain.clone(),
            client_id: elem.client_id,
            opcode: elem.opcode,
            key: elem.key.clone(),
            payload: elem.payload.clone(),
        }
    }
}
