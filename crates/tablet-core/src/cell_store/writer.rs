//! Builds one immutable cell store from a sorted stream of `(key, value)` pairs (§4.3).
//!
//! The writer buffers cells into a block, and once the block reaches
//! [`Config::cell_store_block_size`](crate::config::Config::cell_store_block_size) it compresses
//! and flushes the block, recording its first key and byte range in the index. `finish` writes
//! the bloom filter block, the index block, and the trailer, in that order, so that a reader
//! opening the file only has to trust bytes that come after a successful trailer validation.

use tablet_vfs::traits::WritableFile;

use crate::compressors::{CompressorList, CompressorId as _, NoneCompressor};
use crate::error::CellStoreError;
use crate::filter::{BloomPolicy, FilterPolicy as _};

use super::block::{encode_block, encode_index, IndexEntry};
use super::trailer::Trailer;


/// Streams `(key, value)` pairs into data blocks, then finalizes the bloom filter, index, and
/// trailer. Cells must be supplied in ascending key order; this is not checked.
pub struct CellStoreWriter<File> {
    file:             File,
    codec:            u8,
    target_block_size: usize,
    bloom_policy:     BloomPolicy,

    pending:          Vec<(Vec<u8>, Vec<u8>)>,
    pending_size:     usize,

    offset:           u64,
    index:            Vec<IndexEntry>,
    all_keys:         Vec<u8>,
    all_key_offsets:  Vec<usize>,

    generation:       u64,
    row_count:        u64,
    cell_count:       u64,
    last_row:         Option<Vec<u8>>,
}

impl<File: WritableFile> CellStoreWriter<File> {
    #[must_use]
    pub fn new(
        file:              File,
        generation:        u64,
        target_block_size: usize,
        false_positive_rate: f64,
    ) -> Self {
        Self {
            file,
            codec: NoneCompressor::ID,
            target_block_size,
            bloom_policy: BloomPolicy::from_false_positive_rate(false_positive_rate),
            pending: Vec::new(),
            pending_size: 0,
            offset: 0,
            index: Vec::new(),
            all_keys: Vec::new(),
            all_key_offsets: Vec::new(),
            generation,
            row_count: 0,
            cell_count: 0,
            last_row: None,
        }
    }

    /// Selects the codec used for data blocks; defaults to [`NoneCompressor`].
    pub fn set_codec(&mut self, codec: u8) {
        self.codec = codec;
    }

    /// Buffers one cell. `row` is passed separately purely to track the store's distinct row
    /// count; it must be the row encoded at the front of `key`.
    pub fn add(&mut self, key: &[u8], value: &[u8], row: &[u8]) -> Result<(), CellStoreError> {
        if self.last_row.as_deref() != Some(row) {
            self.row_count += 1;
            self.last_row = Some(row.to_vec());
        }
        self.cell_count += 1;

        self.all_key_offsets.push(self.all_keys.len());
        self.all_keys.extend_from_slice(key);

        self.pending_size += key.len() + value.len();
        self.pending.push((key.to_vec(), value.to_vec()));

        if self.pending_size >= self.target_block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<(), CellStoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let Some((first_key, _)) = self.pending.first().cloned() else { return Ok(()) };

        let raw = encode_block(self.pending.iter().map(|(k, v)| (k.as_slice(), v.as_slice())));
        let compressed = self.compress(&raw)?;

        self.file.write_all(&compressed).map_err(|err| CellStoreError::Io(err.to_string()))?;

        self.index.push(IndexEntry {
            first_key,
            offset: self.offset,
            #[expect(clippy::as_conversions, reason = "block sizes never approach u64::MAX")]
            length: compressed.len() as u64,
        });
        #[expect(clippy::as_conversions, reason = "block sizes never approach u64::MAX")]
        { self.offset += compressed.len() as u64; }

        self.pending.clear();
        self.pending_size = 0;
        Ok(())
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CellStoreError> {
        let list = CompressorList::new();
        let compressor = list.get(self.codec)
            .ok_or_else(|| CellStoreError::Io(format!("unknown codec id {}", self.codec)))?;
        let mut out = Vec::new();
        compressor.encode_into(raw, &mut out)
            .map_err(|err| CellStoreError::Io(err.error_msg))?;
        Ok(out)
    }

    /// Flushes the final partial block (if any), writes the bloom filter, index, and trailer,
    /// and flushes the underlying file. Returns the number of bytes written to the data portion
    /// of the file (i.e. the offset the bloom filter block begins at).
    pub fn finish(mut self) -> Result<u64, CellStoreError> {
        self.flush_block()?;

        let bloom_offset = self.offset;
        let filter = self.bloom_policy.create_filter(&self.all_keys, &self.all_key_offsets);
        self.file.write_all(&filter).map_err(|err| CellStoreError::Io(err.to_string()))?;
        #[expect(clippy::as_conversions, reason = "filter sizes never approach u64::MAX")]
        let bloom_length = filter.len() as u64;
        self.offset += bloom_length;

        let index_offset = self.offset;
        let index_bytes = encode_index(&self.index);
        self.file.write_all(&index_bytes).map_err(|err| CellStoreError::Io(err.to_string()))?;
        #[expect(clippy::as_conversions, reason = "index sizes never approach u64::MAX")]
        let index_length = index_bytes.len() as u64;
        self.offset += index_length;

        let trailer = Trailer {
            generation: self.generation,
            row_count: self.row_count,
            cell_count: self.cell_count,
            #[expect(clippy::as_conversions, reason = "block counts never approach u64::MAX")]
            block_count: self.index.len() as u64,
            codec: self.codec,
            bloom_offset,
            bloom_length,
            index_offset,
            index_length,
        };
        self.file.write_all(&trailer.encode()).map_err(|err| CellStoreError::Io(err.to_string()))?;
        self.file.sync_data().map_err(|err| CellStoreError::Io(err.to_string()))?;

        Ok(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::reader::CellStoreReader;
    use tablet_vfs::traits::{ReadableFilesystem as _, WritableFilesystem as _};
    use tablet_vfs::ThreadLocalMemoryFS;
    use std::path::Path;

    #[test]
    fn writes_a_store_a_reader_can_open() {
        let mut fs = ThreadLocalMemoryFS::new();
        let path = Path::new("/store-000001");
        let file = fs.open_writable(path, true).unwrap();

        let mut writer = CellStoreWriter::new(file, 1, 64, 0.01);
        for i in 0_u32..200 {
            let key = format!("row{i:04}\0cf\x001\0\0").into_bytes();
            let value = format!("value{i}").into_bytes();
            let row = format!("row{i:04}").into_bytes();
            writer.add(&key, &value, &row).unwrap();
        }
        writer.finish().unwrap();

        let random_access = fs.open_random_access(path).unwrap();
        let size = fs.size_of(path).unwrap();
        let reader = CellStoreReader::open(random_access, size).unwrap();
        assert_eq!(reader.trailer().cell_count, 200);
        assert_eq!(reader.trailer().row_count, 200);
    }
}
