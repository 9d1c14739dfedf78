//! The range server's metalog (§4.9): a typed, id-collapsing journal of range entities and
//! deferred tasks, mirrored to DFS, with a `Recover` sentinel marking a complete initial write.

mod entity;
mod reader;
mod writer;

pub use self::entity::{Entity, EntityHeader, EntityType, ENTITY_HEADER_SIZE, RECOVER_ENTITY_ID, REMOVE_FLAG};
pub use self::reader::{MetaLogReader, MetaLogState};
pub use self::writer::MetaLogWriter;

use std::path::Path;

use tablet_vfs::traits::ReadableFilesystem;


/// Identifies a metalog file, as distinct from any other file that might land in the same
/// directory. `"tablet.ml"` truncated to 8 bytes, read as a big-endian `u64`.
const MAGIC: u64 = 0x7461_626c_6574_2e6d;

/// Metalog files are named as a zero-padded decimal file number, ordered numerically by name.
fn file_name(number: u64) -> String {
    format!("{number:010}")
}

fn parse_file_name(name: &str) -> Option<u64> {
    if name.len() != 10 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// The highest file number present in `dir`, or `None` for a brand-new metalog.
fn highest_file_number<Fs: ReadableFilesystem>(fs: &Fs, dir: &Path) -> Result<Option<u64>, String> {
    use tablet_vfs::traits::IntoDirectoryIterator as _;

    if !fs.exists(dir).map_err(|err| err.to_string())? {
        return Ok(None);
    }
    let mut highest = None;
    for entry in fs.children(dir).map_err(|err| err.to_string())?.dir_iter() {
        let entry = entry.map_err(|err| err.to_string())?;
        if let Some(name) = entry.to_str() {
            if let Some(number) = parse_file_name(name) {
                highest = Some(highest.map_or(number, |h: u64| h.max(number)));
            }
        }
    }
    Ok(highest)
}
