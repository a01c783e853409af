//! TLV record writer and reader
//!
//! Records are laid out back to back as `type (1) | length (1) | value`.
//! There is no message header; a buffer is simply a sequence of records
//! ending where the buffer ends.
//!
//! Writing comes in two flavours: [`insert_tlv`] fills a caller-provided
//! slice and hands back the unwritten remainder (the cursor), [`put_tlv`]
//! appends to a growable `BytesMut`. Reading goes through [`iterate`], a lazy
//! iterator that validates every declared length against the buffer before
//! yielding the record.

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{NOTIF_NAME_SIZE, TLV_MAX_VALUE_LEN, TLV_OVERHEAD};
use bytes::{BufMut, BytesMut};
use tracing::debug;

/// Single decoded record borrowing its value from the source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    pub tlv_type: u8,
    /// Offset of the record header within the source buffer
    pub offset: usize,
    pub value: &'a [u8],
}

impl<'a> TlvRecord<'a> {
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

fn check_value_len(tlv_type: u8, value: &[u8]) -> ProtocolResult<()> {
    if value.len() > TLV_MAX_VALUE_LEN {
        return Err(ProtocolError::ValueTooLong {
            size: value.len(),
            limit: TLV_MAX_VALUE_LEN,
            tlv_type,
        });
    }
    Ok(())
}

/// Write one record at the start of `buffer` and return the remainder
///
/// Nothing is written when the record does not fit.
///
/// ```
/// use notif_codec::tlv::insert_tlv;
///
/// let mut buf = [0u8; 8];
/// let rest = insert_tlv(&mut buf, 9, b"key").unwrap();
/// assert_eq!(rest.len(), 3);
/// assert_eq!(&buf[..5], &[9, 3, b'k', b'e', b'y']);
/// ```
pub fn insert_tlv<'a>(buffer: &'a mut [u8], tlv_type: u8, value: &[u8]) -> ProtocolResult<&'a mut [u8]> {
    check_value_len(tlv_type, value)?;

    let need = TLV_OVERHEAD + value.len();
    if buffer.len() < need {
        return Err(ProtocolError::buffer_too_small(
            need,
            buffer.len(),
            format!("TLV type {}", tlv_type),
        ));
    }

    let (record, rest) = buffer.split_at_mut(need);
    record[0] = tlv_type;
    record[1] = value.len() as u8;
    record[TLV_OVERHEAD..].copy_from_slice(value);
    Ok(rest)
}

/// Append one record to a growable buffer
pub fn put_tlv(out: &mut BytesMut, tlv_type: u8, value: &[u8]) -> ProtocolResult<()> {
    check_value_len(tlv_type, value)?;

    out.reserve(TLV_OVERHEAD + value.len());
    out.put_u8(tlv_type);
    out.put_u8(value.len() as u8);
    out.put_slice(value);
    Ok(())
}

/// NUL-pad a name into the fixed wire width
pub fn pad_name(tlv_type: u8, name: &str) -> ProtocolResult<[u8; NOTIF_NAME_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.len() > NOTIF_NAME_SIZE {
        return Err(ProtocolError::InvalidName {
            tlv_type,
            reason: format!("{} bytes exceeds {}", bytes.len(), NOTIF_NAME_SIZE),
        });
    }

    let mut padded = [0u8; NOTIF_NAME_SIZE];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Strip NUL padding from a fixed-width name
pub fn unpad_name(tlv_type: u8, value: &[u8]) -> ProtocolResult<String> {
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    std::str::from_utf8(&value[..end])
        .map(str::to_owned)
        .map_err(|e| ProtocolError::InvalidName {
            tlv_type,
            reason: e.to_string(),
        })
}

/// Lazy iterator over the records in a buffer
///
/// Cloning the iterator (or calling [`TlvIter::restart`]) starts over from
/// the first record. A record whose header or declared length runs past the
/// end of the buffer yields a single [`ProtocolError::TruncatedTlv`] and
/// ends iteration.
#[derive(Debug, Clone)]
pub struct TlvIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> TlvIter<'a> {
    pub fn restart(&mut self) {
        self.offset = 0;
        self.failed = false;
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = ProtocolResult<TlvRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        let offset = self.offset;
        let tlv_type = self.buf[offset];

        if self.buf.len() - offset < TLV_OVERHEAD {
            self.failed = true;
            return Some(Err(ProtocolError::truncated_tlv(
                self.buf.len(),
                offset + TLV_OVERHEAD,
                tlv_type,
                offset,
            )));
        }

        let len = self.buf[offset + 1] as usize;
        let end = offset + TLV_OVERHEAD + len;
        if end > self.buf.len() {
            self.failed = true;
            debug!(tlv_type, offset, declared_len = len, buffer_size = self.buf.len(), "TLV overruns buffer");
            return Some(Err(ProtocolError::truncated_tlv(self.buf.len(), end, tlv_type, offset)));
        }

        self.offset = end;
        Some(Ok(TlvRecord {
            tlv_type,
            offset,
            value: &self.buf[offset + TLV_OVERHEAD..end],
        }))
    }
}

impl std::iter::FusedIterator for TlvIter<'_> {}

/// Iterate the records of `buffer`
pub fn iterate(buffer: &[u8]) -> TlvIter<'_> {
    TlvIter {
        buf: buffer,
        offset: 0,
        failed: false,
    }
}

/// Value of the first well-formed record of `tlv_type`
pub fn find_tlv(buffer: &[u8], tlv_type: u8) -> Option<&[u8]> {
    iterate(buffer)
        .map_while(Result::ok)
        .find(|record| record.tlv_type == tlv_type)
        .map(|record| record.value)
}
