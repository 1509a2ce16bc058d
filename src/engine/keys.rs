//! Order-preserving row key encodings
//!
//! Primary rows are keyed by big-endian record number. Secondary rows are
//! keyed by (index value, segment number): value bytes with 0x00 escaped as
//! 0x00 0xFF, a 0x00 0x00 terminator, then the 4-byte big-endian segment.
//! Byte order of the encoded key equals (value, segment) order, and the
//! escaped form of a value prefix is a byte prefix of every escaped value
//! that starts with it, which is what the partial-key filter relies on.

use crate::error::{Result, SegstoreError};
use crate::segment::{RecordNumber, SegmentNumber};

pub(crate) fn record_key(record: RecordNumber) -> [u8; 8] {
    record.to_be_bytes()
}

pub(crate) fn record_from_key(key: &[u8]) -> Result<RecordNumber> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| SegstoreError::Corruption(format!("primary key of {} bytes", key.len())))?;
    Ok(RecordNumber::from_be_bytes(bytes))
}

/// Escaped value bytes without terminator; the seek target for a
/// partial-key (prefix) filter.
pub(crate) fn escape_value(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    for &byte in value {
        out.push(byte);
        if byte == 0x00 {
            out.push(0xFF);
        }
    }
    out
}

/// Full key for one (value, segment) index row.
pub(crate) fn index_key(value: &[u8], segment: SegmentNumber) -> Vec<u8> {
    let mut out = escape_value(value);
    out.extend_from_slice(&[0x00, 0x00]);
    out.extend_from_slice(&segment.0.to_be_bytes());
    out
}

/// Key prefix shared by every segment row of one exact value.
pub(crate) fn value_prefix(value: &[u8]) -> Vec<u8> {
    let mut out = escape_value(value);
    out.extend_from_slice(&[0x00, 0x00]);
    out
}

/// Split an index row key back into (value, segment).
pub(crate) fn split_index_key(key: &[u8]) -> Result<(Vec<u8>, SegmentNumber)> {
    let corrupt = || SegstoreError::Corruption("malformed index row key".into());

    if key.len() < 6 {
        return Err(corrupt());
    }
    let (body, segment_bytes) = key.split_at(key.len() - 4);
    let segment = u32::from_be_bytes(segment_bytes.try_into().map_err(|_| corrupt())?);

    let mut value = Vec::with_capacity(body.len());
    let mut i = 0;
    loop {
        let &byte = body.get(i).ok_or_else(corrupt)?;
        if byte != 0x00 {
            value.push(byte);
            i += 1;
            continue;
        }
        match body.get(i + 1) {
            Some(0xFF) => {
                value.push(0x00);
                i += 2;
            }
            Some(0x00) if i + 2 == body.len() => return Ok((value, SegmentNumber(segment))),
            _ => return Err(corrupt()),
        }
    }
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when no such key exists.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last != 0xFF {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}
