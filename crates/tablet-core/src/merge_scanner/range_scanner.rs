//! The range-level merge scanner (§4.4): fans in one access-group scanner per participating
//! access group (plus, during migration, a transfer-log-derived scanner built the same way),
//! enforces row ordering across them, and is the only layer that counts `row_limit`/`cell_limit`
//! -- counting them inside an access-group scanner would under-count rows whose cells are split
//! across access groups.

use crate::cell::Cell;

use super::access_group::MergeScannerAccessGroup;


/// One row's worth of already-merged, filtered cells, combined across every participating
/// access group.
#[derive(Debug)]
pub struct RowBlock {
    pub row:   Vec<u8>,
    pub cells: Vec<Cell>,
}

/// Merges the per-access-group scanners of one range into one ordered stream of rows (§4.4,
/// §4.6 `create_scanner`).
#[derive(Debug)]
pub struct MergeScannerRange {
    groups:        Vec<MergeScannerAccessGroup>,
    pending:       Vec<Option<(Vec<u8>, Vec<Cell>)>>,
    row_limit:     Option<u64>,
    cell_limit:    Option<u64>,
    rows_emitted:  u64,
    cells_emitted: u64,
}

impl MergeScannerRange {
    #[must_use]
    pub fn new(mut groups: Vec<MergeScannerAccessGroup>, row_limit: Option<u64>, cell_limit: Option<u64>) -> Self {
        let pending = groups.iter_mut().map(MergeScannerAccessGroup::next).collect();
        Self { groups, pending, row_limit, cell_limit, rows_emitted: 0, cells_emitted: 0 }
    }

    #[must_use]
    pub fn disk_bytes_read(&self) -> u64 {
        self.groups.iter().map(MergeScannerAccessGroup::disk_bytes_read).sum()
    }

    /// Returns the next row's combined cells across every access group, or `None` once every
    /// group is exhausted or a configured limit has been reached.
    pub fn next_row(&mut self) -> Option<RowBlock> {
        if let Some(limit) = self.row_limit {
            if self.rows_emitted >= limit {
                return None;
            }
        }
        if let Some(limit) = self.cell_limit {
            if self.cells_emitted >= limit {
                return None;
            }
        }

        let min_row = self.pending.iter().filter_map(|slot| slot.as_ref().map(|(row, _)| row.clone())).min()?;

        let mut combined = Vec::new();
        for idx in 0..self.groups.len() {
            loop {
                let matches = matches!(&self.pending[idx], Some((row, _)) if *row == min_row);
                if !matches {
                    break;
                }
                if let Some((_, cells)) = self.pending[idx].take() {
                    combined.extend(cells);
                }
                self.pending[idx] = self.groups[idx].next();
            }
        }

        if let Some(limit) = self.cell_limit {
            let remaining = limit.saturating_sub(self.cells_emitted);
            #[expect(clippy::as_conversions, reason = "combined.len() is bounded by in-memory cell counts")]
            if combined.len() as u64 > remaining {
                #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "remaining checked above")]
                combined.truncate(remaining as usize);
            }
        }

        self.rows_emitted += 1;
        #[expect(clippy::as_conversions, reason = "combined.len() is bounded by in-memory cell counts")]
        { self.cells_emitted += combined.len() as u64; }

        Some(RowBlock { row: min_row, cells: combined })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{write_key, TimeOrder};
    use crate::cell::Flag;
    use crate::merge_scanner::BufferedSource;
    use crate::scan_context::{ScanContext, ScanSpec};
    use crate::schema::{AccessGroupSchema, ColumnFamily, TableSchema};

    fn schema() -> TableSchema {
        TableSchema {
            table_id: "t".into(),
            generation: 1,
            column_families: vec![ColumnFamily {
                id: 0, name: "f".into(), access_group: "ag".into(),
                ttl_seconds: None, max_versions: 10, is_counter: false,
                time_order: TimeOrder::Descending,
            }],
            access_groups: vec![AccessGroupSchema {
                name: "ag".into(), column_family_ids: vec![0], in_memory: false,
            }],
            log_class: crate::schema::LogClass::User,
        }
    }

    fn entry(row: &[u8], ts: i64, rev: i64) -> (Vec<u8>, Vec<u8>) {
        let mut key = Vec::new();
        write_key(&mut key, row, 0, b"q", Flag::Insert, ts, rev, TimeOrder::Descending).unwrap();
        (key, b"v".to_vec())
    }

    fn ctx() -> ScanContext {
        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };
        ScanContext::compile(&spec, &schema()).unwrap()
    }

    #[test]
    fn merges_rows_in_order_across_groups() {
        let group_a = MergeScannerAccessGroup::new(
            vec![BufferedSource::new(vec![entry(b"a", 100, 1)], 0)], ctx(), 0,
        );
        let group_b = MergeScannerAccessGroup::new(
            vec![BufferedSource::new(vec![entry(b"b", 100, 1)], 0)], ctx(), 0,
        );
        let mut scanner = MergeScannerRange::new(vec![group_a, group_b], None, None);

        let first = scanner.next_row().unwrap();
        assert_eq!(first.row, b"a");
        let second = scanner.next_row().unwrap();
        assert_eq!(second.row, b"b");
        assert!(scanner.next_row().is_none());
    }

    #[test]
    fn row_limit_stops_after_n_rows() {
        let group = MergeScannerAccessGroup::new(
            vec![BufferedSource::new(vec![entry(b"a", 100, 1), entry(b"b", 100, 1)], 0)], ctx(), 0,
        );
        let mut scanner = MergeScannerRange::new(vec![group], Some(1), None);
        assert!(scanner.next_row().is_some());
        assert!(scanner.next_row().is_none());
    }

    #[test]
    fn cell_limit_truncates_within_a_row() {
        let mut entries = vec![
            entry(b"a", 300, 3),
            entry(b"a", 200, 2),
            entry(b"a", 100, 1),
        ];
        entries.sort();
        let group = MergeScannerAccessGroup::new(vec![BufferedSource::new(entries, 0)], ctx(), 0);
        let mut scanner = MergeScannerRange::new(vec![group], None, Some(2));
        let row = scanner.next_row().unwrap();
        assert_eq!(row.cells.len(), 2);
    }
}
