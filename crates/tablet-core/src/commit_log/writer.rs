//! Appends compressed, checksummed blocks to a commit log directory, rolling to a new fragment
//! file once the current one exceeds a configured size (§4.7).

use std::path::PathBuf;

use tablet_vfs::traits::{WritableFile, WritableFilesystem};

use crate::compressors::{CompressorList, CompressorId as _, NoneCompressor};
use crate::error::CommitLogError;

use super::fragment::{fragment_path, mark_path, BlockHeader};
use super::LINKS_FILE_NAME;


/// A writable commit log: one open fragment file at a time, rolled to a fresh numbered fragment
/// once [`roll_size`](CommitLogWriter::new) is exceeded.
///
/// Held by value, matching [`CellStoreWriter`](crate::cell_store::CellStoreWriter)'s ownership
/// of its `File`: the range server opens one commit log per access group for as long as the
/// range is loaded, so there is no benefit to borrowing the filesystem handle instead.
pub struct CommitLogWriter<Fs: WritableFilesystem> {
    fs:               Fs,
    dir:              PathBuf,
    roll_size:        u64,
    codec:            u8,

    fragment:         u64,
    file:             Option<Fs::WriteFile>,
    fragment_bytes:   u64,
    fragment_min_rev: Option<i64>,
    fragment_max_rev: Option<i64>,
}

impl<Fs: WritableFilesystem> CommitLogWriter<Fs> {
    /// Opens (creating if necessary) a commit log rooted at `dir`, resuming after the highest
    /// fragment number already present so that re-opening a log after a crash appends rather
    /// than overwrites.
    pub fn open(mut fs: Fs, dir: PathBuf, roll_size: u64) -> Result<Self, CommitLogError> {
        fs.create_dir_all(&dir).map_err(|err| CommitLogError::Io(err.to_string()))?;
        let next_fragment = super::reader::highest_fragment_number(&fs, &dir)?.map_or(0, |n| n + 1);
        Ok(Self {
            fs,
            dir,
            roll_size,
            codec: NoneCompressor::ID,
            fragment: next_fragment,
            file: None,
            fragment_bytes: 0,
            fragment_min_rev: None,
            fragment_max_rev: None,
        })
    }

    pub fn set_codec(&mut self, codec: u8) {
        self.codec = codec;
    }

    /// Releases the filesystem handle this writer holds, for a caller that wants to open a
    /// [`CommitLogReader`](super::reader::CommitLogReader) (or another writer, over a different
    /// log) against the same underlying filesystem once this writer is done with it.
    #[must_use]
    pub fn into_fs(self) -> Fs {
        self.fs
    }

    /// Appends one block covering `[revision_min, revision_max]` built from `payload`.
    pub fn append(&mut self, revision_min: i64, revision_max: i64, payload: &[u8]) -> Result<(), CommitLogError> {
        if self.file.is_none() {
            self.open_fragment()?;
        }

        let compressed = self.compress(payload)?;
        let header = BlockHeader {
            codec: self.codec,
            #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "blocks stay well under u32::MAX")]
            uncompressed_len: payload.len() as u32,
            #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "blocks stay well under u32::MAX")]
            compressed_len: compressed.len() as u32,
            checksum: crate::serialize::fletcher32(&compressed),
            revision_min,
            revision_max,
        };

        #[expect(clippy::unwrap_used, reason = "file opened just above or on an earlier call")]
        let file = self.file.as_mut().unwrap();
        file.write_all(&header.encode()).map_err(|err| CommitLogError::Io(err.to_string()))?;
        file.write_all(&compressed).map_err(|err| CommitLogError::Io(err.to_string()))?;

        #[expect(clippy::as_conversions, reason = "block sizes never approach u64::MAX")]
        { self.fragment_bytes += (super::fragment::HEADER_SIZE + compressed.len()) as u64; }
        self.fragment_min_rev = Some(self.fragment_min_rev.map_or(revision_min, |min| min.min(revision_min)));
        self.fragment_max_rev = Some(self.fragment_max_rev.map_or(revision_max, |max| max.max(revision_max)));

        if self.fragment_bytes >= self.roll_size {
            self.roll()?;
        }
        Ok(())
    }

    /// Flushes durably to the currently open fragment. The root, metadata, and system logs call
    /// this on every commit; the user log calls it only once per coalesced group-commit window
    /// (§4.8).
    pub fn sync(&mut self) -> Result<(), CommitLogError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data().map_err(|err| CommitLogError::Io(err.to_string()))?;
        }
        Ok(())
    }

    /// Closes the current fragment early (writing its `.mark` sentinel) without waiting for
    /// `roll_size` to be exceeded. Used when relinquishing a range or shutting down cleanly.
    pub fn roll(&mut self) -> Result<(), CommitLogError> {
        if self.file.take().is_some() {
            self.sync_current()?;
            let mark = mark_path(&self.dir, self.fragment);
            self.fs.open_writable(&mark, true).map_err(|err| CommitLogError::Io(err.to_string()))?;
            self.fragment += 1;
            self.fragment_bytes = 0;
            self.fragment_min_rev = None;
            self.fragment_max_rev = None;
        }
        Ok(())
    }

    /// Links `other`'s fragments into this log for replay, by recording its directory in this
    /// log's links manifest (§4.7 "Linking a transfer log"). Appending the same directory twice
    /// is a no-op, making repeated calls idempotent (§8 Testable Property 6).
    pub fn link_log(&mut self, other: &std::path::Path) -> Result<(), CommitLogError> {
        let links_path = self.dir.join(LINKS_FILE_NAME);
        let mut existing = super::reader::read_links(&self.fs, &links_path)
            .map_err(|err| CommitLogError::Io(err.to_string()))?;
        if existing.iter().any(|linked| linked == other) {
            return Ok(());
        }
        existing.push(other.to_path_buf());

        let mut body = String::new();
        for path in &existing {
            body.push_str(&path.to_string_lossy());
            body.push('\n');
        }
        let mut file = self.fs.open_writable(&links_path, true).map_err(|err| CommitLogError::Io(err.to_string()))?;
        file.write_all(body.as_bytes()).map_err(|err| CommitLogError::Io(err.to_string()))?;
        file.sync_data().map_err(|err| CommitLogError::Io(err.to_string()))?;
        Ok(())
    }

    fn open_fragment(&mut self) -> Result<(), CommitLogError> {
        let path = fragment_path(&self.dir, self.fragment);
        let file = self.fs.open_writable(&path, true).map_err(|err| CommitLogError::Io(err.to_string()))?;
        self.file = Some(file);
        Ok(())
    }

    fn sync_current(&mut self) -> Result<(), CommitLogError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data().map_err(|err| CommitLogError::Io(err.to_string()))?;
        }
        Ok(())
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, CommitLogError> {
        let list = CompressorList::new();
        let compressor = list.get(self.codec)
            .ok_or(CommitLogError::UnsupportedCodec(self.codec))?;
        let mut out = Vec::new();
        compressor.encode_into(raw, &mut out).map_err(|err| CommitLogError::Io(err.error_msg))?;
        Ok(out)
    }
}
