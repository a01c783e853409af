//! Codec errors for TLV encoding and decoding
//!
//! Every variant carries enough context (type, offset, sizes) to locate the
//! offending record in a captured buffer without re-running the decoder.

use thiserror::Error;

/// TLV encoding/decoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Destination buffer cannot hold the record (or message) being written
    #[error("Buffer too small: need {need} bytes, have {have} (context: {context})")]
    BufferTooSmall {
        need: usize,
        have: usize,
        context: String,
    },

    /// A record header declares more bytes than the buffer holds
    #[error("Truncated TLV: need {required_bytes} bytes, buffer has {buffer_size} (TLV type {tlv_type} at offset {offset})")]
    TruncatedTlv {
        buffer_size: usize,
        required_bytes: usize,
        tlv_type: u8,
        offset: usize,
    },

    /// Value does not fit the one-byte length field
    #[error("TLV value too long: {size} bytes exceeds limit {limit} (type {tlv_type})")]
    ValueTooLong {
        size: usize,
        limit: usize,
        tlv_type: u8,
    },

    /// Fixed-size record carries the wrong number of bytes
    #[error("TLV payload size mismatch for type {tlv_type}: expected {expected} bytes, got {got}")]
    PayloadSizeMismatch {
        tlv_type: u8,
        expected: usize,
        got: usize,
    },

    /// A record required to decode the message is absent
    #[error("Missing mandatory TLV type {tlv_type} ({field})")]
    MissingTlv { tlv_type: u8, field: &'static str },

    /// Record value is well-formed but not a legal value for its field
    #[error("Invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u8 },

    /// A record that may appear once per message appears again
    #[error("Duplicate TLV type {tlv_type} at offset {offset}")]
    DuplicateTlv { tlv_type: u8, offset: usize },

    /// Fixed-size name field is not valid UTF-8
    #[error("Invalid name in TLV type {tlv_type}: {reason}")]
    InvalidName { tlv_type: u8, reason: String },
}

impl ProtocolError {
    pub fn buffer_too_small(need: usize, have: usize, context: impl Into<String>) -> Self {
        Self::BufferTooSmall {
            need,
            have,
            context: context.into(),
        }
    }

    pub fn truncated_tlv(buffer_size: usize, required_bytes: usize, tlv_type: u8, offset: usize) -> Self {
        Self::TruncatedTlv {
            buffer_size,
            required_bytes,
            tlv_type,
            offset,
        }
    }

    /// True when the error came from malformed input rather than a local
    /// sizing mistake by the encoder
    pub fn is_malformed_input(&self) -> bool {
        !matches!(self, Self::BufferTooSmall { .. } | Self::ValueTooLong { .. })
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
