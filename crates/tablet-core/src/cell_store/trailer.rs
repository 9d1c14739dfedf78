//! The fixed trailer written at the end of a cell store (§4.3): generation, counts, codec,
//! and the byte ranges of the bloom filter and index blocks. Its presence (checksum + magic)
//! is exactly what distinguishes a finished store from a partial, still-being-written one.

use crate::error::CellStoreError;
use crate::serialize::fletcher32;


/// Identifies a finished cell-store file, as opposed to a partial one left by a writer that
/// never reached `finish` (crash, or still in progress).
const MAGIC: u64 = 0x7461_626c_6574_2e31; // "tablet.1" in ASCII, read as a big-endian u64.

/// `generation(8) + row_count(8) + cell_count(8) + block_count(8) + codec(1)
///  + bloom_offset(8) + bloom_length(8) + index_offset(8) + index_length(8)
///  + checksum(4) + magic(8)`.
pub const TRAILER_SIZE: usize = 8 * 9 + 1 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub generation:   u64,
    pub row_count:    u64,
    pub cell_count:   u64,
    pub block_count:  u64,
    pub codec:        u8,
    pub bloom_offset: u64,
    pub bloom_length: u64,
    pub index_offset: u64,
    pub index_length: u64,
}

impl Trailer {
    #[must_use]
    pub fn encode(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0_u8; TRAILER_SIZE];
        let mut body = Vec::with_capacity(TRAILER_SIZE - 4 - 8);
        body.extend_from_slice(&self.generation.to_le_bytes());
        body.extend_from_slice(&self.row_count.to_le_bytes());
        body.extend_from_slice(&self.cell_count.to_le_bytes());
        body.extend_from_slice(&self.block_count.to_le_bytes());
        body.push(self.codec);
        body.extend_from_slice(&self.bloom_offset.to_le_bytes());
        body.extend_from_slice(&self.bloom_length.to_le_bytes());
        body.extend_from_slice(&self.index_offset.to_le_bytes());
        body.extend_from_slice(&self.index_length.to_le_bytes());

        let checksum = fletcher32(&body);
        #[expect(clippy::indexing_slicing, reason = "buf sized exactly TRAILER_SIZE above")]
        {
            buf[..body.len()].copy_from_slice(&body);
            buf[body.len()..body.len() + 4].copy_from_slice(&checksum.to_le_bytes());
            buf[body.len() + 4..].copy_from_slice(&MAGIC.to_be_bytes());
        }
        buf
    }

    /// Returns `Err(CellStoreError::NotPresent)` when `bytes` doesn't look like a finished
    /// trailer at all (wrong magic), and `Err(TrailerChecksumMismatch)` when the magic matches
    /// but the checksum over the body doesn't (on-disk corruption).
    pub fn decode(bytes: &[u8]) -> Result<Self, CellStoreError> {
        if bytes.len() != TRAILER_SIZE {
            return Err(CellStoreError::NotPresent);
        }
        #[expect(clippy::indexing_slicing, reason = "length checked above")]
        let magic = u64::from_be_bytes(bytes[bytes.len() - 8..].try_into().unwrap_or_default());
        if magic != MAGIC {
            return Err(CellStoreError::NotPresent);
        }

        let body_len = TRAILER_SIZE - 4 - 8;
        #[expect(clippy::indexing_slicing, reason = "TRAILER_SIZE invariant")]
        let body = &bytes[..body_len];
        #[expect(clippy::indexing_slicing, reason = "TRAILER_SIZE invariant")]
        let checksum_bytes = &bytes[body_len..body_len + 4];
        #[expect(clippy::unwrap_used, reason = "slice is exactly 4 bytes")]
        let checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        if fletcher32(body) != checksum {
            return Err(CellStoreError::TrailerChecksumMismatch);
        }

        let mut cursor = body;
        let mut take8 = || -> u64 {
            #[expect(clippy::unwrap_used, reason = "body_len guarantees enough bytes remain")]
            let (field, rest) = cursor.split_at(8);
            cursor = rest;
            u64::from_le_bytes(field.try_into().unwrap())
        };

        let generation   = take8();
        let row_count    = take8();
        let cell_count   = take8();
        let block_count  = take8();
        #[expect(clippy::unwrap_used, reason = "body_len guarantees a byte remains")]
        let (&codec, rest) = cursor.split_first().unwrap();
        cursor = rest;
        let mut take8 = || -> u64 {
            #[expect(clippy::unwrap_used, reason = "body_len guarantees enough bytes remain")]
            let (field, rest) = cursor.split_at(8);
            cursor = rest;
            u64::from_le_bytes(field.try_into().unwrap())
        };
        let bloom_offset = take8();
        let bloom_length = take8();
        let index_offset = take8();
        let index_length = take8();

        Ok(Self {
            generation, row_count, cell_count, block_count, codec,
            bloom_offset, bloom_length, index_offset, index_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let trailer = Trailer {
            generation: 3, row_count: 100, cell_count: 500, block_count: 4, codec: 1,
            bloom_offset: 10, bloom_length: 20, index_offset: 30, index_length: 40,
        };
        let encoded = trailer.encode();
        assert_eq!(Trailer::decode(&encoded).unwrap(), trailer);
    }

    #[test]
    fn garbage_is_not_present() {
        let garbage = vec![0_u8; TRAILER_SIZE];
        assert!(matches!(Trailer::decode(&garbage), Err(CellStoreError::NotPresent)));
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let trailer = Trailer {
            generation: 1, row_count: 1, cell_count: 1, block_count: 1, codec: 0,
            bloom_offset: 0, bloom_length: 0, index_offset: 0, index_length: 0,
        };
        let mut encoded = trailer.encode();
        encoded[0] ^= 0xff;
        assert!(matches!(Trailer::decode(&encoded), Err(CellStoreError::TrailerChecksumMismatch)));
    }
}
