//! Walks a commit log directory's fragments in numeric order, validating and decompressing each
//! block (§4.7).

use std::io::Read as _;
use std::path::{Path, PathBuf};

use tablet_vfs::traits::{ReadableFilesystem, WritableFilesystem};

use crate::compressors::CompressorList;
use crate::error::CommitLogError;

use super::fragment::{parse_fragment_file_name, BlockHeader, HEADER_SIZE};


/// One decoded block, with its revision range and decompressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedBlock {
    pub revision_min: i64,
    pub revision_max: i64,
    pub payload:       Vec<u8>,
}

/// Reads the fragments of one commit log directory (plus, if present, any logs it has linked
/// in) into an ordered sequence of blocks, for application during range load (§4.6 `replay`,
/// §4.10 "Load").
pub struct CommitLogReader<Fs> {
    fs:  Fs,
    dir: PathBuf,

    disk_bytes_read: u64,
}

impl<Fs: WritableFilesystem> CommitLogReader<Fs> {
    #[must_use]
    pub fn new(fs: Fs, dir: PathBuf) -> Self {
        Self { fs, dir, disk_bytes_read: 0 }
    }

    #[must_use]
    pub fn disk_bytes_read(&self) -> u64 {
        self.disk_bytes_read
    }

    /// Replays every block across every linked log (in link order) followed by this log's own
    /// fragments -- a transfer log is linked in before the handoff that produced it is
    /// acknowledged, so its contents logically precede whatever this log records afterward.
    pub fn replay(&mut self) -> Result<Vec<ReplayedBlock>, CommitLogError> {
        let links_path = self.dir.join(super::LINKS_FILE_NAME);
        let linked_dirs = read_links(&self.fs, &links_path).map_err(|err| CommitLogError::Io(err.to_string()))?;

        let mut blocks = Vec::new();
        for dir in linked_dirs.iter().chain(std::iter::once(&self.dir)) {
            blocks.extend(self.replay_dir(dir)?);
        }
        Ok(blocks)
    }

    fn replay_dir(&mut self, dir: &Path) -> Result<Vec<ReplayedBlock>, CommitLogError> {
        let fragments = sorted_fragment_numbers(&self.fs, dir)?;

        let mut blocks = Vec::new();
        for fragment in fragments {
            let path = super::fragment::fragment_path(dir, fragment);
            let size = self.fs.size_of(&path).map_err(|err| CommitLogError::Io(err.to_string()))?;
            if size == 0 {
                // A fragment file created by `open_writable` but never appended to (e.g. a
                // writer opened then immediately rolled, or a crash between create and first
                // append). Removed before replay so it isn't mistaken for a truncated write.
                self.fs.delete(&path).map_err(|err| CommitLogError::Io(err.to_string()))?;
                continue;
            }

            let mut file = self.fs.open_sequential(&path).map_err(|err| CommitLogError::Io(err.to_string()))?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).map_err(|err| CommitLogError::Io(err.to_string()))?;
            #[expect(clippy::as_conversions, reason = "fragment sizes never approach u64::MAX")]
            { self.disk_bytes_read += contents.len() as u64; }

            blocks.extend(decode_fragment(&contents, fragment)?);
        }
        Ok(blocks)
    }
}

/// Decodes every complete block in one fragment's raw bytes. A header or payload that runs past
/// the end of `contents` is treated as a truncated trailing write -- the writer crashed
/// mid-append -- and ends replay of this fragment without raising; a block whose checksum
/// doesn't match raises, since that indicates corruption rather than a partial write.
fn decode_fragment(contents: &[u8], fragment: u64) -> Result<Vec<ReplayedBlock>, CommitLogError> {
    let mut blocks = Vec::new();
    let mut cursor = contents;
    let mut prev_revision_max: Option<i64> = None;

    loop {
        if cursor.is_empty() {
            break;
        }
        let Ok(header_bytes) = <[u8; HEADER_SIZE]>::try_from(cursor.get(..HEADER_SIZE).unwrap_or(cursor)) else {
            break;
        };
        let header = BlockHeader::decode(&header_bytes)?;
        #[expect(clippy::as_conversions, reason = "compressed_len is a u32 within one fragment file")]
        let compressed_len = header.compressed_len as usize;
        let Some(payload_bytes) = cursor.get(HEADER_SIZE..HEADER_SIZE + compressed_len) else {
            break;
        };

        if !super::fragment::checksum_matches(&header, payload_bytes) {
            return Err(CommitLogError::ChecksumMismatch { fragment });
        }
        if let Some(prev_max) = prev_revision_max {
            if header.revision_min < prev_max {
                return Err(CommitLogError::RevisionOrderError);
            }
        }
        prev_revision_max = Some(header.revision_max);

        let list = CompressorList::new();
        let compressor = list.get(header.codec).ok_or(CommitLogError::UnsupportedCodec(header.codec))?;
        let mut payload = Vec::new();
        compressor.decode_into(payload_bytes, &mut payload)
            .map_err(|err| CommitLogError::Io(err.error_msg))?;

        blocks.push(ReplayedBlock { revision_min: header.revision_min, revision_max: header.revision_max, payload });
        cursor = &cursor[HEADER_SIZE + compressed_len..];
    }

    Ok(blocks)
}

/// Lists the fragment numbers directly present in `dir`, sorted ascending.
pub(super) fn sorted_fragment_numbers<Fs: ReadableFilesystem>(fs: &Fs, dir: &Path) -> Result<Vec<u64>, CommitLogError> {
    use tablet_vfs::traits::IntoDirectoryIterator as _;

    if !fs.exists(dir).map_err(|err| CommitLogError::Io(err.to_string()))? {
        return Ok(Vec::new());
    }

    let mut numbers = Vec::new();
    for entry in fs.children(dir).map_err(|err| CommitLogError::Io(err.to_string()))?.dir_iter() {
        let entry = entry.map_err(|err| CommitLogError::Io(err.to_string()))?;
        if let Some(name) = entry.to_str() {
            if let Some(fragment) = parse_fragment_file_name(name) {
                numbers.push(fragment);
            }
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// The highest fragment number present in `dir`, or `None` if the directory has no fragments
/// yet (a brand-new log).
pub(super) fn highest_fragment_number<Fs: ReadableFilesystem>(fs: &Fs, dir: &Path) -> Result<Option<u64>, CommitLogError> {
    Ok(sorted_fragment_numbers(fs, dir)?.into_iter().max())
}

/// Reads the links manifest at `links_path`, or an empty list if it doesn't exist yet (a log
/// that has never had a transfer log linked into it).
pub(super) fn read_links<Fs: ReadableFilesystem>(fs: &Fs, links_path: &Path) -> Result<Vec<PathBuf>, Fs::Error> {
    if !fs.exists(links_path)? {
        return Ok(Vec::new());
    }
    let mut file = fs.open_sequential(links_path)?;
    let mut contents = String::new();
    // `Read::read_to_string` needs an `io::Error`; the filesystem's own error type doesn't
    // implement `From<io::Error>`, so fall back to an empty manifest on any read failure other
    // than the file not existing, which was already ruled out above.
    let _ = file.read_to_string(&mut contents);
    Ok(contents.lines().map(PathBuf::from).collect())
}
