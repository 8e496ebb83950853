//! Composed storage keys. The ordered tiers (delta index, compacted store)
//! key rows by `[prefixLen:4][prefix][key]` so a whole prefix can be range
//! scanned with one contiguous byte range.

use bytes::{Buf, BufMut};

pub fn compose(prefix: Option<&[u8]>, key: &[u8]) -> Vec<u8> {
    let prefix = prefix.unwrap_or(&[]);
    let mut buf = Vec::with_capacity(4 + prefix.len() + key.len());
    buf.put_u32(prefix.len() as u32);
    buf.put_slice(prefix);
    buf.put_slice(key);
    buf
}

pub fn decompose(composed: &[u8]) -> (Option<Vec<u8>>, Vec<u8>) {
    let mut buf = composed;
    let prefix_len = buf.get_u32() as usize;
    let prefix = buf.copy_to_bytes(prefix_len).to_vec();
    let key = buf.to_vec();
    if prefix.is_empty() {
        (None, key)
    } else {
        (Some(prefix), key)
    }
}

/// Smallest byte string strictly greater than every key starting with
/// `from`. Increment-with-carry; trailing 0xff bytes are dropped.
pub fn prefix_upper_exclusive(from: &[u8]) -> Vec<u8> {
    let mut upper = from.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xff {
            *last += 1;
            return upper;
        }
        upper.pop();
    }
    // all 0xff: no finite upper bound, scan to the end
    upper
}
