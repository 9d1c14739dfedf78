//! Appends typed entities to a metalog directory, rolling to a fresh collapsed snapshot file and
//! pruning older ones beyond `history_size` (§4.9).

use std::path::PathBuf;

use hashbrown::HashMap;

use tablet_vfs::traits::{WritableFile, WritableFilesystem};

use crate::error::MetaLogError;

use super::entity::{Entity, EntityType, RECOVER_ENTITY_ID};
use super::{file_name, highest_file_number, MAGIC};


/// A writable metalog: one open file holding a collapsed snapshot of every live entity followed
/// by the `Recover` sentinel, with further `put`/`remove` calls appended after it until the next
/// [`roll`](Self::roll).
///
/// The specification's background `WriteScheduler` is not modeled as a real scheduled task here
/// (this stack carries no async runtime, matching the rest of the crate); `put`/`remove` instead
/// flush synchronously on every call, standing in for `signal_write_ready`'s immediate-flush
/// path for every write rather than just the durability-critical ones. See DESIGN.md.
pub struct MetaLogWriter<Fs: WritableFilesystem> {
    fs:            Fs,
    dir:           PathBuf,
    name:          String,
    version:       i32,
    history_size:  u32,

    file_number:   u64,
    file:          Fs::WriteFile,
    entities:      HashMap<i64, Entity>,
}

impl<Fs: WritableFilesystem> MetaLogWriter<Fs> {
    /// Opens a fresh metalog file holding `initial_entities` (typically whatever a
    /// [`MetaLogReader`](super::MetaLogReader) collapsed out of the previous file set on
    /// recovery), followed by the `Recover` sentinel.
    pub fn open(
        mut fs:           Fs,
        dir:              PathBuf,
        name:             String,
        version:          i32,
        history_size:     u32,
        initial_entities: Vec<Entity>,
        timestamp:        i64,
    ) -> Result<Self, MetaLogError> {
        fs.create_dir_all(&dir).map_err(|err| MetaLogError::Io(err.to_string()))?;
        let file_number = highest_file_number(&fs, &dir).map_err(|err| MetaLogError::Io(err.to_string()))?
            .map_or(0, |n| n + 1);

        let path = dir.join(file_name(file_number));
        let mut file = fs.open_writable(&path, true).map_err(|err| MetaLogError::Io(err.to_string()))?;

        write_file_header(&mut file, &name, version)?;
        let mut entities = HashMap::with_capacity(initial_entities.len());
        for entity in initial_entities {
            write_entity(&mut file, &entity)?;
            entities.insert(entity.header.id, entity);
        }
        write_entity(&mut file, &Entity::new(EntityType::Recover, RECOVER_ENTITY_ID, timestamp, 0, Vec::new()))?;
        file.sync_data().map_err(|err| MetaLogError::Io(err.to_string()))?;

        Ok(Self { fs, dir, name, version, history_size, file_number, file, entities })
    }

    /// Writes (or overwrites) the entity for `id`, collapsing any prior version in the
    /// in-memory map, and flushes immediately.
    pub fn put(&mut self, entity_type: EntityType, id: i64, timestamp: i64, payload: Vec<u8>) -> Result<(), MetaLogError> {
        let entity = Entity::new(entity_type, id, timestamp, 0, payload);
        write_entity(&mut self.file, &entity)?;
        self.file.sync_data().map_err(|err| MetaLogError::Io(err.to_string()))?;
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Marks `id` as logically deleted (`flags & REMOVE`), dropping it from the in-memory map so
    /// the next [`roll`](Self::roll) snapshot omits it entirely.
    pub fn remove(&mut self, entity_type: EntityType, id: i64, timestamp: i64) -> Result<(), MetaLogError> {
        let entity = Entity::new(entity_type, id, timestamp, super::entity::REMOVE_FLAG, Vec::new());
        write_entity(&mut self.file, &entity)?;
        self.file.sync_data().map_err(|err| MetaLogError::Io(err.to_string()))?;
        self.entities.remove(&id);
        Ok(())
    }

    /// Writes a fresh file holding a collapsed snapshot of every currently-live entity plus a
    /// new `Recover` sentinel, then prunes files older than the `history_size` most recent ones.
    pub fn roll(&mut self, timestamp: i64) -> Result<(), MetaLogError> {
        let live: Vec<Entity> = self.entities.values().cloned().collect();
        let next_number = self.file_number + 1;
        let path = self.dir.join(file_name(next_number));
        let mut file = self.fs.open_writable(&path, true).map_err(|err| MetaLogError::Io(err.to_string()))?;

        write_file_header(&mut file, &self.name, self.version)?;
        for entity in &live {
            write_entity(&mut file, entity)?;
        }
        write_entity(&mut file, &Entity::new(EntityType::Recover, RECOVER_ENTITY_ID, timestamp, 0, Vec::new()))?;
        file.sync_data().map_err(|err| MetaLogError::Io(err.to_string()))?;

        self.file = file;
        self.file_number = next_number;
        self.prune_old_files()?;
        Ok(())
    }

    /// Releases the filesystem handle this writer holds, for a caller (tests, or a shutdown
    /// path) that wants to open a [`MetaLogReader`](super::MetaLogReader) against the same
    /// underlying filesystem once this writer is done with it.
    #[must_use]
    pub fn into_fs(self) -> Fs {
        self.fs
    }

    fn prune_old_files(&mut self) -> Result<(), MetaLogError> {
        #[expect(clippy::as_conversions, reason = "history_size is a small configured count")]
        let keep_from = self.file_number.saturating_sub(u64::from(self.history_size));
        for number in 0..keep_from {
            let path = self.dir.join(file_name(number));
            if self.fs.exists(&path).map_err(|err| MetaLogError::Io(err.to_string()))? {
                self.fs.delete(&path).map_err(|err| MetaLogError::Io(err.to_string()))?;
            }
        }
        Ok(())
    }
}

fn write_file_header<File: WritableFile>(file: &mut File, name: &str, version: i32) -> Result<(), MetaLogError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    crate::serialize::write_nul_terminated_string(&mut buf, name);
    buf.extend_from_slice(&version.to_le_bytes());
    file.write_all(&buf).map_err(|err| MetaLogError::Io(err.to_string()))
}

fn write_entity<File: WritableFile>(file: &mut File, entity: &Entity) -> Result<(), MetaLogError> {
    file.write_all(&entity.header.encode()).map_err(|err| MetaLogError::Io(err.to_string()))?;
    file.write_all(&entity.payload).map_err(|err| MetaLogError::Io(err.to_string()))
}
