//! Compression codecs available to cell-store data blocks and commit-log blocks (§4.3, §4.7).
//! Codec ids are persisted in the cell-store trailer and commit-log block header, so the
//! numbering here is an on-disk format detail, not an implementation convenience.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use super::{CompressionError, Compressor, CompressorId};


/// No compression; the payload is copied verbatim. Codec id `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCompressor;

impl CompressorId for NoneCompressor {
    const ID: u8 = 0;
}

impl Compressor for NoneCompressor {
    fn encode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        output_buf.extend_from_slice(source);
        Ok(())
    }

    fn decode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        output_buf.extend_from_slice(source);
        Ok(())
    }
}

/// Snappy compression via `snap`. Codec id `1`.
#[cfg(feature = "snappy-compression")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCompressor;

#[cfg(feature = "snappy-compression")]
impl CompressorId for SnappyCompressor {
    const ID: u8 = 1;
}

#[cfg(feature = "snappy-compression")]
impl Compressor for SnappyCompressor {
    fn encode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder.compress_vec(source).map_err(|err| CompressionError {
            error_msg: err.to_string(),
        })?;
        output_buf.extend_from_slice(&compressed);
        Ok(())
    }

    fn decode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(source).map_err(|err| CompressionError {
            error_msg: err.to_string(),
        })?;
        output_buf.extend_from_slice(&decompressed);
        Ok(())
    }
}

/// Zstandard compression via `zstd`. Codec id `2`.
#[cfg(feature = "zstd-compression")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    pub compression_level: i32,
}

#[cfg(feature = "zstd-compression")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { compression_level: zstd::DEFAULT_COMPRESSION_LEVEL }
    }
}

#[cfg(feature = "zstd-compression")]
impl CompressorId for ZstdCompressor {
    const ID: u8 = 2;
}

#[cfg(feature = "zstd-compression")]
impl Compressor for ZstdCompressor {
    fn encode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        use std::io::Write as _;
        let mut encoder = zstd::Encoder::new(output_buf, self.compression_level)
            .map_err(|err| CompressionError { error_msg: err.to_string() })?;
        encoder.write_all(source).map_err(|err| CompressionError { error_msg: err.to_string() })?;
        encoder.finish().map_err(|err| CompressionError { error_msg: err.to_string() })?;
        Ok(())
    }

    fn decode_into(&self, source: &[u8], output_buf: &mut Vec<u8>) -> Result<(), CompressionError> {
        use std::io::Read as _;
        let mut decoder = zstd::Decoder::new(source)
            .map_err(|err| CompressionError { error_msg: err.to_string() })?;
        decoder.read_to_end(output_buf).map_err(|err| CompressionError { error_msg: err.to_string() })?;
        Ok(())
    }
}

/// A small registry mapping a one-byte codec id to the [`Compressor`] that reads/writes it,
/// so a cell store or commit log can be opened without knowing which codec wrote it (§4.3).
#[derive(Clone)]
pub struct CompressorList {
    entries: Vec<(u8, Box<dyn Compressor>)>,
}

impl Debug for CompressorList {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CompressorList")
            .field("codec_ids", &self.entries.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CompressorList {
    fn default() -> Self {
        let mut list = Self { entries: Vec::new() };
        list.register(NoneCompressor::ID, Box::new(NoneCompressor));
        #[cfg(feature = "snappy-compression")]
        list.register(SnappyCompressor::ID, Box::new(SnappyCompressor));
        #[cfg(feature = "zstd-compression")]
        list.register(ZstdCompressor::ID, Box::new(ZstdCompressor::default()));
        list
    }
}

impl CompressorList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u8, compressor: Box<dyn Compressor>) {
        self.entries.retain(|(existing_id, _)| *existing_id != id);
        self.entries.push((id, compressor));
    }

    #[must_use]
    pub fn get(&self, id: u8) -> Option<&dyn Compressor> {
        self.entries.iter().find(|(entry_id, _)| *entry_id == id).map(|(_, c)| c.as_ref())
    }
}
