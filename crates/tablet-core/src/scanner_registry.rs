//! The scanner registry (§4.12): the server-wide table of open range-level scanners, handed out
//! as opaque ids and fetched a byte-bounded block at a time.
//!
//! A scanner keeps its owning range's scan counter (§4.6 `increment_scan_counter`) incremented
//! for as long as it is registered, so the maintenance scheduler and split/relinquish machinery
//! can see that a range is not quiescent. [`ScannerRegistry::sweep_expired`] is this registry's
//! half of the specification's scanner-TTL sweep; the other half -- calling it on a timer -- is
//! the caller's, per the synchronous-stages design used throughout this crate (see
//! [`crate::update_pipeline`]).

use std::collections::HashMap;

use tablet_vfs::traits::WritableFilesystem;

use crate::error::ScannerError;
use crate::merge_scanner::range_scanner::RowBlock;
use crate::range_table::{RangeId, RangeTable};
use crate::scan_context::ScanSpec;

/// Opaque handle returned by [`ScannerRegistry::create_scanner`] and used by every later call
/// against the same scanner (§4.12).
pub type ScannerId = u64;

struct Entry<Fs: WritableFilesystem> {
    scanner:  crate::merge_scanner::MergeScannerRange,
    range_id: RangeId,
    deadline_nanos: i64,
    _fs: std::marker::PhantomData<Fs>,
}

/// One `fetch_scanblock` response: every row read up to the byte budget, and whether the
/// underlying scanner is now exhausted (§4.12).
#[derive(Debug, Default)]
pub struct ScanBlock {
    pub rows:      Vec<RowBlock>,
    pub exhausted: bool,
}

/// The server-wide open-scanner table (§4.12, §5 "Shared resources").
pub struct ScannerRegistry<Fs: WritableFilesystem> {
    scanners:  HashMap<ScannerId, Entry<Fs>>,
    next_id:   ScannerId,
    ttl_nanos: i64,
}

impl<Fs: WritableFilesystem + Clone> ScannerRegistry<Fs> {
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        #[expect(clippy::as_conversions, reason = "millisecond TTLs stay far below i64::MAX nanoseconds")]
        let ttl_nanos = (ttl_ms as i64).saturating_mul(1_000_000);
        Self { scanners: HashMap::new(), next_id: 0, ttl_nanos }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Compiles `spec` against `table_id`'s range covering `row` and registers the resulting
    /// scanner, incrementing that range's scan counter (§4.6 `create_scanner`, §4.12). The row is
    /// only used for routing to the correct loaded range; `spec`'s own row interval still governs
    /// which rows the scanner actually emits.
    pub fn create_scanner(
        &mut self,
        ranges:    &mut RangeTable<Fs>,
        table_id:  &str,
        row:       &[u8],
        spec:      &ScanSpec,
        now_nanos: i64,
    ) -> Result<ScannerId, ScannerError> {
        let range = ranges.find_mut(table_id, row).ok_or(crate::error::RangeError::RangeNotFound)?;
        let scanner = range.create_scanner(spec, now_nanos)?;
        range.increment_scan_counter();

        let id = self.next_id;
        self.next_id += 1;
        let range_id: RangeId = (table_id.to_string(), range.start_row().to_vec());
        self.scanners.insert(id, Entry {
            scanner, range_id, deadline_nanos: now_nanos.saturating_add(self.ttl_nanos),
            _fs: std::marker::PhantomData,
        });
        Ok(id)
    }

    /// Reads rows from `id`'s scanner until `byte_budget` is exceeded or the scanner is
    /// exhausted, refreshing its TTL deadline (§4.12 `fetch_scanblock`). A scanner that reaches
    /// exhaustion is dropped from the registry automatically, releasing its range's scan counter,
    /// since there is nothing left to fetch and no reason to wait out its TTL.
    pub fn fetch_scanblock(
        &mut self,
        ranges:      &mut RangeTable<Fs>,
        id:          ScannerId,
        now_nanos:   i64,
        byte_budget: u64,
    ) -> Result<ScanBlock, ScannerError> {
        let entry = self.scanners.get_mut(&id).ok_or(ScannerError::NotFound(id))?;
        entry.deadline_nanos = now_nanos.saturating_add(self.ttl_nanos);

        let mut block = ScanBlock::default();
        let mut bytes_read: u64 = 0;
        while bytes_read < byte_budget {
            let Some(row) = entry.scanner.next_row() else {
                block.exhausted = true;
                break;
            };
            #[expect(clippy::as_conversions, reason = "one row's bytes stay well under u64::MAX")]
            { bytes_read += row.cells.iter().map(|cell| cell.value.len() as u64).sum::<u64>() + row.row.len() as u64; }
            block.rows.push(row);
        }

        if block.exhausted {
            self.remove(ranges, id);
        }
        Ok(block)
    }

    /// Closes a scanner before its TTL would otherwise expire it (§4.12 `destroy_scanner`),
    /// releasing its range's scan counter.
    pub fn destroy_scanner(&mut self, ranges: &mut RangeTable<Fs>, id: ScannerId) -> Result<(), ScannerError> {
        self.remove(ranges, id).ok_or(ScannerError::NotFound(id))?;
        Ok(())
    }

    fn remove(&mut self, ranges: &mut RangeTable<Fs>, id: ScannerId) -> Option<()> {
        let entry = self.scanners.remove(&id)?;
        if let Some(range) = ranges.get_mut(&entry.range_id) {
            range.decrement_scan_counter();
        }
        Some(())
    }

    /// Drops every scanner whose TTL has expired as of `now_nanos` (§4.12 "Scanner expiry"),
    /// releasing each one's range scan counter. Returns how many were swept, for diagnostics.
    pub fn sweep_expired(&mut self, ranges: &mut RangeTable<Fs>, now_nanos: i64) -> usize {
        let expired: Vec<ScannerId> = self.scanners.iter()
            .filter(|(_, entry)| entry.deadline_nanos <= now_nanos)
            .map(|(&id, _)| id)
            .collect();
        let count = expired.len();
        for id in expired {
            self.remove(ranges, id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use tablet_vfs::{SharedFs, ThreadLocalMemoryFS};

    use crate::cell::Flag;
    use crate::key::{write_key, TimeOrder};
    use crate::range::Range;
    use crate::schema::{AccessGroupSchema, ColumnFamily, LogClass, TableSchema};

    fn schema() -> crate::schema::TableInfo {
        Arc::new(TableSchema {
            table_id: "t".into(),
            generation: 1,
            column_families: vec![ColumnFamily {
                id: 0, name: "f".into(), access_group: "default".into(),
                ttl_seconds: None, max_versions: 10, is_counter: false,
                time_order: TimeOrder::Descending,
            }],
            access_groups: vec![AccessGroupSchema {
                name: "default".into(), column_family_ids: vec![0], in_memory: false,
            }],
            log_class: LogClass::User,
        })
    }

    fn key_for(row: &[u8], rev: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_key(&mut buf, row, 0, b"q", Flag::Insert, rev, rev, TimeOrder::Descending).unwrap();
        buf
    }

    fn table_with_rows() -> RangeTable<SharedFs<ThreadLocalMemoryFS>> {
        let fs = SharedFs::new(ThreadLocalMemoryFS::new());
        let mut table = RangeTable::new();
        let mut range = Range::open(fs, PathBuf::from("/r"), schema(), b"a".to_vec(), b"z".to_vec(), 1 << 20, 1 << 16, 0.01).unwrap();
        range.add(1, &key_for(b"m", 1), b"v1", 1).unwrap();
        range.add(1, &key_for(b"n", 2), b"v2", 2).unwrap();
        table.insert(range);
        table
    }

    #[test]
    fn create_then_fetch_then_exhaust_drops_the_scanner() {
        let mut table = table_with_rows();
        let mut registry = ScannerRegistry::new(60_000);
        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };

        let id = registry.create_scanner(&mut table, "t", b"m", &spec, 0).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(table.get(&("t".to_string(), b"a".to_vec())).unwrap().scan_count(), 1);

        let block = registry.fetch_scanblock(&mut table, id, 0, 1 << 20).unwrap();
        assert_eq!(block.rows.len(), 2);
        assert!(block.exhausted);
        assert_eq!(registry.len(), 0);
        assert_eq!(table.get(&("t".to_string(), b"a".to_vec())).unwrap().scan_count(), 0);
    }

    #[test]
    fn destroy_scanner_releases_the_scan_counter() {
        let mut table = table_with_rows();
        let mut registry = ScannerRegistry::new(60_000);
        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };

        let id = registry.create_scanner(&mut table, "t", b"m", &spec, 0).unwrap();
        registry.destroy_scanner(&mut table, id).unwrap();
        assert_eq!(table.get(&("t".to_string(), b"a".to_vec())).unwrap().scan_count(), 0);
        assert!(registry.destroy_scanner(&mut table, id).is_err());
    }

    #[test]
    fn sweep_expired_drops_stale_scanners_only() {
        let mut table = table_with_rows();
        let mut registry = ScannerRegistry::new(100);
        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };

        let id = registry.create_scanner(&mut table, "t", b"m", &spec, 0).unwrap();
        assert_eq!(registry.sweep_expired(&mut table, 50_000_000), 0);
        assert_eq!(registry.sweep_expired(&mut table, 200_000_000), 1);
        assert_eq!(registry.len(), 0);
        let _ = id;
    }
}
