//! Typed metalog entities and their fixed 32-byte header (§4.9, §6 "Metalog on-disk format").

use bijective_enum_map::injective_enum_map;

use crate::error::MetaLogError;
use crate::serialize::fletcher32;


/// `type(4) + checksum(4) + length(4) + flags(4) + id(8) + timestamp(8)`.
pub const ENTITY_HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 8 + 8;

/// Set on [`EntityHeader::flags`] to mark an id as logically deleted (§4.9).
pub const REMOVE_FLAG: i32 = 1;

/// The id reserved for the [`EntityType::Recover`] sentinel appended after the initial entity
/// set at writer-open time (§4.9).
pub const RECOVER_ENTITY_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Range,
    TaskRemoveTransferLog,
    TaskAcknowledgeRelinquish,
    Recover,
}

injective_enum_map! {
    EntityType, i32,
    Range                     <=> 1,
    TaskRemoveTransferLog     <=> 2,
    TaskAcknowledgeRelinquish <=> 3,
    Recover                   <=> 4,
}

/// The fixed header preceding every entity's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHeader {
    pub entity_type: EntityType,
    pub checksum:    i32,
    pub length:      i32,
    pub flags:       i32,
    pub id:          i64,
    pub timestamp:   i64,
}

impl EntityHeader {
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.flags & REMOVE_FLAG != 0
    }

    #[must_use]
    pub fn encode(&self) -> [u8; ENTITY_HEADER_SIZE] {
        let mut buf = [0_u8; ENTITY_HEADER_SIZE];
        let mut offset = 0;
        #[expect(clippy::indexing_slicing, reason = "buf sized exactly ENTITY_HEADER_SIZE above")]
        {
            buf[offset..offset + 4].copy_from_slice(&i32::from(self.entity_type).to_le_bytes()); offset += 4;
            buf[offset..offset + 4].copy_from_slice(&self.checksum.to_le_bytes()); offset += 4;
            buf[offset..offset + 4].copy_from_slice(&self.length.to_le_bytes()); offset += 4;
            buf[offset..offset + 4].copy_from_slice(&self.flags.to_le_bytes()); offset += 4;
            buf[offset..offset + 8].copy_from_slice(&self.id.to_le_bytes()); offset += 8;
            buf[offset..offset + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8; ENTITY_HEADER_SIZE]) -> Result<Self, MetaLogError> {
        let mut offset = 0;
        #[expect(clippy::indexing_slicing, clippy::unwrap_used, reason = "bytes sized exactly ENTITY_HEADER_SIZE")]
        {
            let raw_type = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let entity_type = EntityType::try_from(raw_type).map_err(|_| MetaLogError::WrongDefinition)?;
            let checksum = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let length = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let flags = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()); offset += 4;
            let id = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()); offset += 8;
            let timestamp = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            Ok(Self { entity_type, checksum, length, flags, id, timestamp })
        }
    }
}

/// One decoded entity: its header plus the raw payload bytes, interpreted by the caller
/// according to [`EntityHeader::entity_type`] (e.g. the range module decodes a `Range` payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub header:  EntityHeader,
    pub payload: Vec<u8>,
}

impl Entity {
    #[must_use]
    pub fn new(entity_type: EntityType, id: i64, timestamp: i64, flags: i32, payload: Vec<u8>) -> Self {
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "entity payloads stay well under i32::MAX")]
        let length = payload.len() as i32;
        let checksum = fletcher32(&payload);
        Self {
            header: EntityHeader { entity_type, checksum, length, flags, id, timestamp },
            payload,
        }
    }

    /// Verifies the payload against the header's checksum, raising
    /// [`MetaLogError::ChecksumMismatch`] keyed by this entity's id on mismatch.
    pub fn verify_checksum(&self) -> Result<(), MetaLogError> {
        if fletcher32(&self.payload) != self.header.checksum {
            return Err(MetaLogError::ChecksumMismatch { id: self.header.id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = EntityHeader {
            entity_type: EntityType::Range, checksum: 0x1234, length: 10, flags: 0,
            id: 42, timestamp: 1000,
        };
        let encoded = header.encode();
        assert_eq!(EntityHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn unknown_type_is_wrong_definition() {
        let mut encoded = EntityHeader {
            entity_type: EntityType::Recover, checksum: 0, length: 0, flags: 0, id: 0, timestamp: 0,
        }.encode();
        encoded[0] = 0x7f;
        assert!(matches!(EntityHeader::decode(&encoded), Err(MetaLogError::WrongDefinition)));
    }

    #[test]
    fn entity_checksum_round_trips() {
        let entity = Entity::new(EntityType::Range, 1, 100, 0, b"payload".to_vec());
        assert!(entity.verify_checksum().is_ok());
    }

    #[test]
    fn remove_flag_is_detected() {
        let header = EntityHeader {
            entity_type: EntityType::Range, checksum: 0, length: 0, flags: REMOVE_FLAG, id: 1, timestamp: 0,
        };
        assert!(header.is_removed());
    }
}
