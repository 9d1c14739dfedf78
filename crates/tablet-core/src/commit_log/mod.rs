//! The commit log and transfer-log linkage (§4.7): an append-only, directory-of-fragments log
//! over a [`WritableFilesystem`](tablet_vfs::traits::WritableFilesystem), with Fletcher-32
//! checksummed, compressed blocks carrying a revision range.

mod fragment;
mod reader;
mod writer;

pub use self::fragment::{BlockHeader, HEADER_SIZE};
pub use self::reader::{CommitLogReader, ReplayedBlock};
pub use self::writer::CommitLogWriter;

/// Name of the small manifest file recording which other log directories have been linked into
/// this one via `link_log` (§4.7 "Linking a transfer log").
const LINKS_FILE_NAME: &str = "LINKS";
