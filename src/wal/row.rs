use std::cmp::Ordering;

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};

use crate::uio::NULL_LENGTH;
use crate::wal::error::WalError;

/// The atomic unit of storage. Immutable once written; a logical update is a
/// new row with the same (prefix, key) and a greater (timestamp, version).
/// `value: None` with `tombstone: true` marks a logical delete.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Row {
    pub prefix: Option<Vec<u8>>,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
    pub tombstone: bool,
    pub version: i64,
}

impl Row {
    pub fn to_bytes(&self) -> Vec<u8> {
        let prefix_len = self.prefix.as_ref().map(|p| p.len()).unwrap_or(0);
        let value_len = self.value.as_ref().map(|v| v.len()).unwrap_or(0);
        let mut buf = Vec::with_capacity(4 + prefix_len + 4 + self.key.len() + 4 + value_len + 17);
        put_byte_array(&mut buf, self.prefix.as_deref());
        put_byte_array(&mut buf, Some(&self.key));
        put_byte_array(&mut buf, self.value.as_deref());
        buf.put_i64(self.timestamp);
        buf.put_u8(if self.tombstone { 1 } else { 0 });
        buf.put_i64(self.version);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let prefix = get_byte_array(&mut buf)?;
        let key = match get_byte_array(&mut buf)? {
            Some(k) => k,
            None => bail!(WalError::CorruptRecord("row key cannot be null")),
        };
        let value = get_byte_array(&mut buf)?;
        if buf.remaining() < 17 {
            bail!(WalError::CorruptRecord("truncated row suffix"));
        }
        let timestamp = buf.get_i64();
        let tombstone = buf.get_u8() == 1;
        let version = buf.get_i64();
        Ok(Self {
            prefix,
            key,
            value,
            timestamp,
            tombstone,
            version,
        })
    }
}

fn put_byte_array(buf: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        None => buf.put_i32(NULL_LENGTH),
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
    }
}

fn get_byte_array(buf: &mut &[u8]) -> Result<Option<Vec<u8>>> {
    if buf.remaining() < 4 {
        bail!(WalError::CorruptRecord("truncated field length"));
    }
    let len = buf.get_i32();
    if len == NULL_LENGTH {
        return Ok(None);
    }
    if len < 0 || buf.remaining() < len as usize {
        bail!(WalError::CorruptRecord("bad field length"));
    }
    Ok(Some(buf.copy_to_bytes(len as usize).to_vec()))
}

/// Locates a row's physical record in a stripe's delta WAL, carrying enough
/// of the row to pick winners without hydrating the value. Never exposed
/// across the network.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WalPointer {
    pub fp: u64,
    pub timestamp: i64,
    pub tombstone: bool,
    pub version: i64,
}

/// The total order used everywhere a winner must be picked among divergent
/// writes: timestamp first, version breaks ties.
pub fn compare_timestamp_version(
    timestamp: i64,
    version: i64,
    other_timestamp: i64,
    other_version: i64,
) -> Ordering {
    match timestamp.cmp(&other_timestamp) {
        Ordering::Equal => version.cmp(&other_version),
        ordering => ordering,
    }
}
