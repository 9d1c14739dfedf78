//! Data-block and index-block encoding shared by the cell-store writer and reader (§4.3).

use crate::serialize::{read_varint32, write_varint32};


/// Encodes one data block: an entry count followed by `varint(key.len()) ++ key ++ value` per
/// cell, in key order.
pub fn encode_block<'a>(entries: impl Iterator<Item = (&'a [u8], &'a [u8])> + Clone) -> Vec<u8> {
    let count = entries.clone().count();
    let mut buf = Vec::new();
    #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
    buf.extend_from_slice(&(count as u32).to_le_bytes());
    for (key, value) in entries {
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
        write_varint32(&mut buf, key.len() as u32);
        buf.extend_from_slice(key);
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
        write_varint32(&mut buf, value.len() as u32);
        buf.extend_from_slice(value);
    }
    buf
}

/// Decodes a block written by [`encode_block`] into owned `(key, value)` pairs, in order.
pub fn decode_block(block: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let Some(count_bytes) = block.get(..4) else { return Vec::new() };
    #[expect(clippy::unwrap_used, reason = "slice is exactly 4 bytes")]
    let count = u32::from_le_bytes(count_bytes.try_into().unwrap());
    let mut rest = block.get(4..).unwrap_or(&[]);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Ok((key_len, after_key_len)) = read_varint32(rest) else { break };
        #[expect(clippy::as_conversions, reason = "key_len was written from a usize")]
        let Some(key) = after_key_len.get(..key_len as usize) else { break };
        let after_key = &after_key_len[key.len()..];
        let Ok((value_len, after_value_len)) = read_varint32(after_key) else { break };
        #[expect(clippy::as_conversions, reason = "value_len was written from a usize")]
        let Some(value) = after_value_len.get(..value_len as usize) else { break };
        out.push((key.to_vec(), value.to_vec()));
        rest = &after_value_len[value.len()..];
    }
    out
}

/// One entry of the index block: the first key of a data block, and that block's byte range in
/// the (compressed) file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub first_key: Vec<u8>,
    pub offset:    u64,
    pub length:    u64,
}

pub fn encode_index(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
    write_varint32(&mut buf, entries.len() as u32);
    for entry in entries {
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
        write_varint32(&mut buf, entry.first_key.len() as u32);
        buf.extend_from_slice(&entry.first_key);
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.length.to_le_bytes());
    }
    buf
}

pub fn decode_index(bytes: &[u8]) -> Option<Vec<IndexEntry>> {
    let (count, mut rest) = read_varint32(bytes).ok()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (key_len, after_key_len) = read_varint32(rest).ok()?;
        #[expect(clippy::as_conversions, reason = "key_len was written from a usize")]
        let first_key = after_key_len.get(..key_len as usize)?.to_vec();
        let after_key = after_key_len.get(first_key.len()..)?;
        let offset_bytes = after_key.get(..8)?;
        let length_bytes = after_key.get(8..16)?;
        #[expect(clippy::unwrap_used, reason = "slices are exactly 8 bytes")]
        let offset = u64::from_le_bytes(offset_bytes.try_into().unwrap());
        #[expect(clippy::unwrap_used, reason = "slices are exactly 8 bytes")]
        let length = u64::from_le_bytes(length_bytes.try_into().unwrap());
        out.push(IndexEntry { first_key, offset, length });
        rest = after_key.get(16..)?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trips() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"b", b"2")];
        let encoded = encode_block(entries.clone().into_iter());
        let decoded = decode_block(&encoded);
        assert_eq!(decoded, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn index_round_trips() {
        let entries = vec![
            IndexEntry { first_key: b"a".to_vec(), offset: 0, length: 100 },
            IndexEntry { first_key: b"m".to_vec(), offset: 100, length: 80 },
        ];
        let encoded = encode_index(&entries);
        assert_eq!(decode_index(&encoded).unwrap(), entries);
    }
}
