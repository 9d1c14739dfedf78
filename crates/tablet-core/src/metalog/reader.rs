//! Reads the highest-numbered file in a metalog directory, decodes and collapses its entities by
//! id, and asserts the `Recover` sentinel's presence (§4.9).

use std::io::Read as _;
use std::path::{Path, PathBuf};

use tablet_vfs::traits::ReadableFilesystem;

use crate::error::MetaLogError;

use super::entity::{Entity, EntityHeader, EntityType, ENTITY_HEADER_SIZE, RECOVER_ENTITY_ID};
use super::{file_name, highest_file_number, MAGIC};


/// A metalog directory's collapsed state as of its newest file: every live (non-removed,
/// non-sentinel) entity, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MetaLogState {
    pub entities: hashbrown::HashMap<i64, Entity>,
}

impl MetaLogState {
    #[must_use]
    pub fn into_entities(self) -> Vec<Entity> {
        self.entities.into_values().collect()
    }
}

/// Reads and validates a metalog directory against an expected `name`/`version` definition.
pub struct MetaLogReader<Fs> {
    fs:      Fs,
    dir:     PathBuf,
    name:    String,
    version: i32,
}

impl<Fs: ReadableFilesystem> MetaLogReader<Fs> {
    #[must_use]
    pub fn new(fs: Fs, dir: PathBuf, name: String, version: i32) -> Self {
        Self { fs, dir, name, version }
    }

    /// Reads the newest file in the directory, validating the file header and decoding and
    /// collapsing every entity by id. Raises [`MetaLogError::MissingRecoverEntity`] if the
    /// `Recover` sentinel was never found, which happens when the writer crashed mid-write of
    /// its initial snapshot (§4.9, §8 Testable Property 8).
    pub fn read(&self) -> Result<MetaLogState, MetaLogError> {
        let Some(number) = highest_file_number(&self.fs, &self.dir).map_err(|err| MetaLogError::Io(err.to_string()))?
        else {
            return Err(MetaLogError::MissingRecoverEntity);
        };

        let path = self.dir.join(file_name(number));
        let mut file = self.fs.open_sequential(&path).map_err(|err| MetaLogError::Io(err.to_string()))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|err| MetaLogError::Io(err.to_string()))?;

        let rest = validate_file_header(&contents, &self.name, self.version)?;
        decode_entities(rest)
    }
}

fn validate_file_header<'a>(contents: &'a [u8], expected_name: &str, definition_version: i32) -> Result<&'a [u8], MetaLogError> {
    let magic_bytes = contents.get(..8).ok_or(MetaLogError::WrongDefinition)?;
    #[expect(clippy::unwrap_used, reason = "slice length checked above")]
    if u64::from_be_bytes(magic_bytes.try_into().unwrap()) != MAGIC {
        return Err(MetaLogError::WrongDefinition);
    }
    let rest = contents.get(8..).ok_or(MetaLogError::WrongDefinition)?;
    let (name, rest) = crate::serialize::read_nul_terminated_string(rest).map_err(|_| MetaLogError::WrongDefinition)?;
    if name != expected_name {
        return Err(MetaLogError::WrongDefinition);
    }
    let version_bytes = rest.get(..4).ok_or(MetaLogError::WrongDefinition)?;
    #[expect(clippy::unwrap_used, reason = "slice length checked above")]
    let version = i32::from_le_bytes(version_bytes.try_into().unwrap());
    if version > definition_version {
        return Err(MetaLogError::WrongDefinition);
    }
    rest.get(4..).ok_or(MetaLogError::WrongDefinition)
}

/// Decodes entities sequentially, collapsing by id and tracking whether the `Recover` sentinel
/// was seen. A header or payload that runs past the end of `contents` stops decoding without
/// raising -- a crash partway through an append after the initial snapshot (which already
/// includes its own `Recover` sentinel) leaves a harmless truncated tail, indistinguishable here
/// from a crash during the initial snapshot itself, which is exactly what the sentinel check
/// below catches.
fn decode_entities(contents: &[u8]) -> Result<MetaLogState, MetaLogError> {
    let mut state = MetaLogState::default();
    let mut cursor = contents;
    let mut found_recover = false;

    loop {
        if cursor.is_empty() {
            break;
        }
        let Ok(header_bytes) = <[u8; ENTITY_HEADER_SIZE]>::try_from(cursor.get(..ENTITY_HEADER_SIZE).unwrap_or(cursor)) else {
            break;
        };
        let Ok(header) = EntityHeader::decode(&header_bytes) else { break };
        #[expect(clippy::as_conversions, clippy::cast_sign_loss, reason = "length is a non-negative payload size")]
        let length = header.length as usize;
        let Some(payload) = cursor.get(ENTITY_HEADER_SIZE..ENTITY_HEADER_SIZE + length) else { break };

        let entity = Entity { header, payload: payload.to_vec() };
        entity.verify_checksum()?;

        if entity.header.entity_type == EntityType::Recover && entity.header.id == RECOVER_ENTITY_ID {
            found_recover = true;
        } else if entity.header.is_removed() {
            state.entities.remove(&entity.header.id);
        } else {
            state.entities.insert(entity.header.id, entity);
        }

        cursor = &cursor[ENTITY_HEADER_SIZE + length..];
    }

    if !found_recover {
        return Err(MetaLogError::MissingRecoverEntity);
    }
    Ok(state)
}
