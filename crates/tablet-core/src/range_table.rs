//! `RangeTable` (Design Notes, "cyclic object graphs ... arena plus indices"): the per-server
//! arena that owns every loaded [`Range`], indexed by table id and row so the update pipeline,
//! maintenance scheduler, and scanner registry can route against it without the reference cycles
//! the source models with shared pointers (`Range` <-> `TableInfo` <-> `AccessGroup` <->
//! `CellStore`).
//!
//! Row routing here only ever consults *locally loaded* ranges: deciding which server a row
//! belongs to at all is the external placement authority's job (§1, out of scope); this table
//! just answers "which of my own ranges, if any, currently covers this row" for a table this
//! server already serves part of.

use std::collections::HashMap;

use tablet_vfs::traits::WritableFilesystem;

use crate::range::Range;

/// Stable identity for one loaded range within a [`RangeTable`]: `(table_id, start_row)`, unique
/// at any instant since a table's ranges partition its key space without overlap (§3).
pub type RangeId = (String, Vec<u8>);

/// The live, loaded-range map of one range server process (§4.10, §5 "Shared resources").
#[derive(Default)]
pub struct RangeTable<Fs: WritableFilesystem> {
    ranges:       HashMap<RangeId, Range<Fs>>,
    table_ranges: HashMap<String, Vec<RangeId>>,
}

impl<Fs: WritableFilesystem + Clone> RangeTable<Fs> {
    #[must_use]
    pub fn new() -> Self {
        Self { ranges: HashMap::new(), table_ranges: HashMap::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Adds a freshly loaded or split-off range to the live map, keyed by its current
    /// `(table_id, start_row)`. Replaces any prior entry under the same id (used when a range's
    /// boundary shrinks after a split: the caller re-inserts under the new start row).
    pub fn insert(&mut self, range: Range<Fs>) {
        let id: RangeId = (range.table_id().to_string(), range.start_row().to_vec());
        let bucket = self.table_ranges.entry(id.0.clone()).or_default();
        if !bucket.contains(&id) {
            bucket.push(id.clone());
        }
        self.ranges.insert(id, range);
    }

    /// Removes a range from the live map entirely, e.g. once a relinquish has been durably
    /// acknowledged (§4.10 "Relinquish").
    pub fn remove(&mut self, id: &RangeId) -> Option<Range<Fs>> {
        if let Some(bucket) = self.table_ranges.get_mut(&id.0) {
            bucket.retain(|candidate| candidate != id);
        }
        self.ranges.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &RangeId) -> Option<&Range<Fs>> {
        self.ranges.get(id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: &RangeId) -> Option<&mut Range<Fs>> {
        self.ranges.get_mut(id)
    }

    /// Finds the loaded range of `table_id` whose `(start_row, end_row]` interval covers `row`
    /// (§3, §4.8 "Qualify"). `None` means either the row belongs to a range this server does not
    /// (yet, or any longer) serve, or `table_id` is unknown here.
    #[must_use]
    pub fn find(&self, table_id: &str, row: &[u8]) -> Option<&Range<Fs>> {
        let id = self.find_id(table_id, row)?;
        self.ranges.get(&id)
    }

    #[must_use]
    pub fn find_mut(&mut self, table_id: &str, row: &[u8]) -> Option<&mut Range<Fs>> {
        let id = self.find_id(table_id, row)?;
        self.ranges.get_mut(&id)
    }

    fn find_id(&self, table_id: &str, row: &[u8]) -> Option<RangeId> {
        self.table_ranges.get(table_id)?.iter()
            .find(|id| self.ranges.get(*id).is_some_and(|range| row > range.start_row() && row <= range.end_row()))
            .cloned()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&RangeId, &Range<Fs>)> {
        self.ranges.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RangeId, &mut Range<Fs>)> {
        self.ranges.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tablet_vfs::{SharedFs, ThreadLocalMemoryFS};

    use crate::key::TimeOrder;
    use crate::schema::{AccessGroupSchema, ColumnFamily, TableSchema};

    fn schema(table_id: &str) -> Arc<TableSchema> {
        Arc::new(TableSchema {
            table_id: table_id.into(),
            generation: 1,
            column_families: vec![ColumnFamily {
                id: 0, name: "f".into(), access_group: "default".into(),
                ttl_seconds: None, max_versions: 10, is_counter: false,
                time_order: TimeOrder::Descending,
            }],
            access_groups: vec![AccessGroupSchema {
                name: "default".into(), column_family_ids: vec![0], in_memory: false,
            }],
            log_class: crate::schema::LogClass::User,
        })
    }

    fn range(fs: SharedFs<ThreadLocalMemoryFS>, table_id: &str, start: &[u8], end: &[u8]) -> Range<SharedFs<ThreadLocalMemoryFS>> {
        Range::open(
            fs, PathBuf::from(format!("/{table_id}/{}", String::from_utf8_lossy(start))),
            schema(table_id), start.to_vec(), end.to_vec(), 1 << 20, 1 << 16, 0.01,
        ).unwrap()
    }

    #[test]
    fn find_routes_to_the_range_covering_the_row() {
        let fs = SharedFs::new(ThreadLocalMemoryFS::new());
        let mut table = RangeTable::new();
        table.insert(range(fs.clone(), "t", b"a", b"m"));
        table.insert(range(fs, "t", b"m", b"z"));

        assert_eq!(table.find("t", b"c").unwrap().end_row(), b"m");
        assert_eq!(table.find("t", b"m").unwrap().end_row(), b"m");
        assert_eq!(table.find("t", b"n").unwrap().end_row(), b"z");
        assert!(table.find("t", b"zz").is_none());
        assert!(table.find("other", b"c").is_none());
    }

    #[test]
    fn remove_drops_a_range_from_routing() {
        let fs = SharedFs::new(ThreadLocalMemoryFS::new());
        let mut table = RangeTable::new();
        table.insert(range(fs, "t", b"a", b"z"));
        let id = ("t".to_string(), b"a".to_vec());
        assert!(table.remove(&id).is_some());
        assert!(table.find("t", b"c").is_none());
        assert_eq!(table.len(), 0);
    }
}
