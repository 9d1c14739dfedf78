//! Fragment file naming and the fixed block header written before every compressed payload
//! (§4.7, §6 "Commit log on-disk format").

use std::path::PathBuf;

use crate::error::CommitLogError;
use crate::serialize::fletcher32;


/// `version(1) + codec(1) + uncompressed_len(4) + compressed_len(4) + checksum(4)
///  + revision_min(8) + revision_max(8)`.
pub const HEADER_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 8 + 8;

const ENCODING_VERSION: u8 = 1;

/// The fixed header preceding one block's compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub codec:            u8,
    pub uncompressed_len:  u32,
    pub compressed_len:    u32,
    pub checksum:          u32,
    pub revision_min:      i64,
    pub revision_max:      i64,
}

impl BlockHeader {
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0_u8; HEADER_SIZE];
        let mut offset = 0;
        #[expect(clippy::indexing_slicing, reason = "buf sized exactly HEADER_SIZE above")]
        {
            buf[offset] = ENCODING_VERSION; offset += 1;
            buf[offset] = self.codec; offset += 1;
            buf[offset..offset + 4].copy_from_slice(&self.uncompressed_len.to_le_bytes()); offset += 4;
            buf[offset..offset + 4].copy_from_slice(&self.compressed_len.to_le_bytes()); offset += 4;
            buf[offset..offset + 4].copy_from_slice(&self.checksum.to_le_bytes()); offset += 4;
            buf[offset..offset + 8].copy_from_slice(&self.revision_min.to_le_bytes()); offset += 8;
            buf[offset..offset + 8].copy_from_slice(&self.revision_max.to_le_bytes());
        }
        buf
    }

    /// Decodes a header from exactly `HEADER_SIZE` bytes. Raises
    /// [`CommitLogError::CorruptFragmentHeader`] on an unrecognized encoding version, since an
    /// unreadable header also means the payload length (and so the next block's offset) can't
    /// be trusted.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CommitLogError> {
        let mut offset = 0;
        #[expect(clippy::indexing_slicing, reason = "bytes sized exactly HEADER_SIZE")]
        let version = bytes[offset]; offset += 1;
        if version != ENCODING_VERSION {
            return Err(CommitLogError::CorruptFragmentHeader);
        }
        #[expect(clippy::indexing_slicing, clippy::unwrap_used, reason = "bytes sized exactly HEADER_SIZE")]
        {
            let codec = bytes[offset]; offset += 1;
            let uncompressed_len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let compressed_len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let checksum = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let revision_min = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()); offset += 8;
            let revision_max = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            Ok(Self { codec, uncompressed_len, compressed_len, checksum, revision_min, revision_max })
        }
    }
}

/// Verifies `payload` (the compressed bytes) against the checksum carried in `header`.
#[must_use]
pub fn checksum_matches(header: &BlockHeader, payload: &[u8]) -> bool {
    fletcher32(payload) == header.checksum
}

/// Fragment files are named as a zero-padded decimal fragment number, ordered numerically by
/// name within their log directory (§4.7).
#[must_use]
pub fn fragment_file_name(fragment: u64) -> String {
    format!("{fragment:010}")
}

#[must_use]
pub fn fragment_path(dir: &std::path::Path, fragment: u64) -> PathBuf {
    dir.join(fragment_file_name(fragment))
}

/// The sibling `*.mark` file that indicates `fragment` was closed cleanly (§4.7).
#[must_use]
pub fn mark_path(dir: &std::path::Path, fragment: u64) -> PathBuf {
    dir.join(format!("{}.mark", fragment_file_name(fragment)))
}

/// Parses a fragment number back out of a file name produced by [`fragment_file_name`], or
/// `None` for anything else in the directory (a `.mark` file, the links manifest, etc.).
#[must_use]
pub fn parse_fragment_file_name(name: &str) -> Option<u64> {
    if name.len() != 10 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = BlockHeader {
            codec: 1, uncompressed_len: 100, compressed_len: 80, checksum: 0xdead_beef,
            revision_min: 5, revision_max: 9,
        };
        let encoded = header.encode();
        assert_eq!(BlockHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let mut encoded = BlockHeader {
            codec: 0, uncompressed_len: 0, compressed_len: 0, checksum: 0, revision_min: 0, revision_max: 0,
        }.encode();
        encoded[0] = 0xff;
        assert!(matches!(BlockHeader::decode(&encoded), Err(CommitLogError::CorruptFragmentHeader)));
    }

    #[test]
    fn fragment_names_sort_numerically() {
        let mut names = vec![fragment_file_name(20), fragment_file_name(3), fragment_file_name(100)];
        names.sort();
        assert_eq!(names, vec![fragment_file_name(3), fragment_file_name(20), fragment_file_name(100)]);
    }

    #[test]
    fn parse_rejects_non_fragment_names() {
        assert_eq!(parse_fragment_file_name(&fragment_file_name(7)), Some(7));
        assert_eq!(parse_fragment_file_name("0000000007.mark"), None);
        assert_eq!(parse_fragment_file_name("LINKS"), None);
    }
}
