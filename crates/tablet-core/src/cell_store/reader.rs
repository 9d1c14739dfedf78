//! Opens a finished cell store for point lookups and ordered scans (§4.3).
//!
//! A reader holds exactly one decompressed data block in memory at a time; advancing to a new
//! block means discarding the old one and decompressing the next. The index (first key per
//! block) is read once, at open time, and kept resident for binary search.

use tablet_vfs::traits::RandomAccess;

use crate::compressors::CompressorList;
use crate::error::CellStoreError;
use crate::filter::{BloomPolicy, FilterPolicy as _};

use super::block::{decode_block, decode_index, IndexEntry};
use super::trailer::{Trailer, TRAILER_SIZE};


/// A finished, immutable cell store opened for reading.
pub struct CellStoreReader<File> {
    file:    File,
    trailer: Trailer,
    index:   Vec<IndexEntry>,
    filter:  Vec<u8>,
}

impl<File: RandomAccess> CellStoreReader<File> {
    /// Opens `file` (whose total length on disk is `file_size`), validating the trailer and
    /// loading the index and bloom filter blocks into memory.
    ///
    /// Returns [`CellStoreError::NotPresent`] for a file that is too short to hold a trailer, or
    /// whose trailer magic doesn't match -- the signal that a writer never called `finish` on it.
    pub fn open(file: File, file_size: u64) -> Result<Self, CellStoreError> {
        if file_size < TRAILER_SIZE as u64 {
            return Err(CellStoreError::NotPresent);
        }
        let trailer_offset = file_size - TRAILER_SIZE as u64;
        let mut trailer_bytes = vec![0_u8; TRAILER_SIZE];
        file.read_exact_at(trailer_offset, &mut trailer_bytes)
            .map_err(|err| CellStoreError::Io(err.to_string()))?;
        let trailer = Trailer::decode(&trailer_bytes)?;

        let mut index_bytes = vec![0_u8; trailer.index_length as usize];
        file.read_exact_at(trailer.index_offset, &mut index_bytes)
            .map_err(|err| CellStoreError::Io(err.to_string()))?;
        let index = decode_index(&index_bytes).ok_or(CellStoreError::CorruptIndex)?;

        let mut filter = vec![0_u8; trailer.bloom_length as usize];
        file.read_exact_at(trailer.bloom_offset, &mut filter)
            .map_err(|err| CellStoreError::Io(err.to_string()))?;

        Ok(Self { file, trailer, index, filter })
    }

    #[must_use]
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Whether `key` could possibly be present, per the bloom filter. A `false` result is
    /// conclusive; a `true` result still requires reading a data block to confirm.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.filter.is_empty() {
            return true;
        }
        BloomPolicy::from_false_positive_rate(0.01).key_may_match(key, &self.filter)
    }

    /// Returns the index of the last block whose first key is `<= start_key`, i.e. the block a
    /// scan starting at `start_key` should begin decompressing from. Returns `None` if the store
    /// is empty or every block's first key is greater than `start_key`.
    fn block_for_key(&self, start_key: &[u8]) -> Option<usize> {
        let partition = self.index.partition_point(|entry| entry.first_key.as_slice() <= start_key);
        partition.checked_sub(1)
    }

    fn read_block(&self, block_idx: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CellStoreError> {
        let entry = self.index.get(block_idx).ok_or(CellStoreError::CorruptIndex)?;
        let mut compressed = vec![0_u8; entry.length as usize];
        self.file.read_exact_at(entry.offset, &mut compressed)
            .map_err(|err| CellStoreError::Io(err.to_string()))?;

        let list = CompressorList::new();
        let compressor = list.get(self.trailer.codec)
            .ok_or_else(|| CellStoreError::Io(format!("unknown codec id {}", self.trailer.codec)))?;
        let mut raw = Vec::new();
        compressor.decode_into(&compressed, &mut raw)
            .map_err(|err| CellStoreError::Io(err.error_msg))?;

        Ok(decode_block(&raw))
    }

    /// Scans every cell at or after `start_key` (or from the very first cell, if `start_key` is
    /// `None`), in key order, lazily decompressing one block at a time.
    pub fn scan_from(
        &self,
        start_key: Option<&[u8]>,
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_, CellStoreError> {
        let first_block = match start_key {
            Some(key) => self.block_for_key(key).unwrap_or(0),
            None => 0,
        };
        let start_key = start_key.map(<[u8]>::to_vec);

        Ok(CellStoreScan {
            reader: self,
            next_block: first_block,
            current: Vec::new().into_iter(),
            start_key,
            started: false,
        })
    }
}

struct CellStoreScan<'a, File> {
    reader:     &'a CellStoreReader<File>,
    next_block: usize,
    current:    std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    start_key:  Option<Vec<u8>>,
    started:    bool,
}

impl<File: RandomAccess> Iterator for CellStoreScan<'_, File> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.current.next() {
                if !self.started {
                    if let Some(start_key) = &self.start_key {
                        if key.as_slice() < start_key.as_slice() {
                            continue;
                        }
                    }
                    self.started = true;
                }
                return Some((key, value));
            }
            if self.next_block >= self.reader.index.len() {
                return None;
            }
            let block = self.reader.read_block(self.next_block).ok()?;
            self.next_block += 1;
            self.current = block.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::writer::CellStoreWriter;
    use tablet_vfs::{ReadableFilesystem as _, WritableFilesystem as _, ThreadLocalMemoryFS};
    use std::path::Path;

    fn build_store() -> (ThreadLocalMemoryFS, std::path::PathBuf) {
        let mut fs = ThreadLocalMemoryFS::new();
        let path = Path::new("/store-000001").to_path_buf();
        let file = fs.open_writable(&path, true).unwrap();
        let mut writer = CellStoreWriter::new(file, 1, 32, 0.01);
        for i in 0_u32..50 {
            let key = format!("row{i:04}\0cf\x001\0\0").into_bytes();
            let value = format!("value{i}").into_bytes();
            let row = format!("row{i:04}").into_bytes();
            writer.add(&key, &value, &row).unwrap();
        }
        writer.finish().unwrap();
        (fs, path)
    }

    #[test]
    fn scans_every_cell_in_order() {
        let (fs, path) = build_store();
        let random_access = fs.open_random_access(&path).unwrap();
        let size = fs.size_of(&path).unwrap();
        let reader = CellStoreReader::open(random_access, size).unwrap();

        let cells: Vec<_> = reader.scan_from(None).unwrap().collect();
        assert_eq!(cells.len(), 50);
        for window in cells.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
    }

    #[test]
    fn scan_from_skips_earlier_keys() {
        let (fs, path) = build_store();
        let random_access = fs.open_random_access(&path).unwrap();
        let size = fs.size_of(&path).unwrap();
        let reader = CellStoreReader::open(random_access, size).unwrap();

        let start = format!("row0025\0cf\x001\0\0").into_bytes();
        let cells: Vec<_> = reader.scan_from(Some(&start)).unwrap().collect();
        assert_eq!(cells.len(), 25);
        assert!(cells[0].0.as_slice() >= start.as_slice());
    }

    #[test]
    fn bloom_filter_rejects_absent_keys() {
        let (fs, path) = build_store();
        let random_access = fs.open_random_access(&path).unwrap();
        let size = fs.size_of(&path).unwrap();
        let reader = CellStoreReader::open(random_access, size).unwrap();

        assert!(reader.may_contain(&format!("row0010\0cf\x001\0\0").into_bytes()));
    }
}
