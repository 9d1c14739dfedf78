//! `MergeScannerAccessGroup` (§4.4): merges one access group's cell cache(s) and cell stores
//! into a filtered, version-reconciled, tombstone-resolved, counter-folded stream of [`Cell`]s.
//!
//! Cells for one row are never split across a `next()` call: a `DELETE_ROW` may be serialized
//! under any column-family id (conventionally the access group's lowest), so dominance across
//! every family of the row can only be resolved once the whole row's candidate cells are in
//! hand. Rows are the natural buffering unit here, since every entry for a row sorts contiguously
//! between the row's own key prefix and the next row's (§3).

use crate::cell::{Cell, CounterOp, CounterValue, Flag};
use crate::key::{parse_key, TimeOrder};
use crate::scan_context::ScanContext;

use super::{pick_min_source, BufferedSource};


/// One parsed candidate cell from the row currently being assembled.
struct Candidate {
    column_family_id: u8,
    qualifier:        Vec<u8>,
    flag:             Flag,
    timestamp:        i64,
    revision:         i64,
    value:            Vec<u8>,
}

/// Merges an access group's sources (§4.4). `now_nanos` is fixed at scanner creation, matching
/// the "scan sees a snapshot taken at `create_scanner` time" guarantee (§5) for TTL evaluation.
#[derive(Debug)]
pub struct MergeScannerAccessGroup {
    sources:          Vec<BufferedSource>,
    ctx:              ScanContext,
    now_nanos:        i64,
    last_row_match:   Option<(Vec<u8>, bool)>,
}

impl MergeScannerAccessGroup {
    #[must_use]
    pub fn new(sources: Vec<BufferedSource>, ctx: ScanContext, now_nanos: i64) -> Self {
        Self { sources, ctx, now_nanos, last_row_match: None }
    }

    #[must_use]
    pub fn disk_bytes_read(&self) -> u64 {
        self.sources.iter().map(BufferedSource::disk_bytes_read).sum()
    }

    /// Returns the next non-empty row's worth of cells, or `None` once every source is
    /// exhausted or the scan's end boundary has been passed.
    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<Cell>)> {
        loop {
            let idx = pick_min_source(&self.sources)?;
            let key = self.sources.get(idx)?.peek_key()?.to_vec();

            let before_start = if self.ctx.start_inclusive {
                key.as_slice() < self.ctx.start_key.as_slice()
            } else {
                key.as_slice() <= self.ctx.start_key.as_slice()
            };
            if before_start {
                self.sources.get_mut(idx)?.advance();
                continue;
            }
            let past_end = if self.ctx.end_inclusive {
                key.as_slice() > self.ctx.end_key.as_slice()
            } else {
                key.as_slice() >= self.ctx.end_key.as_slice()
            };
            if past_end {
                return None;
            }
            let Ok(parsed) = parse_key(&key) else {
                self.sources.get_mut(idx)?.advance();
                continue;
            };
            let row = parsed.row.to_vec();

            if !self.row_matches_cached(&row) {
                self.drain_row(&row);
                continue;
            }

            let entries = self.collect_row(&row);
            let cells = self.process_row(&row, entries);
            if cells.is_empty() {
                continue;
            }
            return Some((row, cells));
        }
    }

    /// Single-entry cache keyed by the last matched row, eliding repeated row-regex work for
    /// runs of cells within the same row (§4.4 item 5).
    fn row_matches_cached(&mut self, row: &[u8]) -> bool {
        if let Some((cached_row, result)) = &self.last_row_match {
            if cached_row.as_slice() == row {
                return *result;
            }
        }
        let result = self.ctx.row_matches(row);
        self.last_row_match = Some((row.to_vec(), result));
        result
    }

    fn collect_row(&mut self, row: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(idx) = pick_min_source(&self.sources) {
            let Some(key) = self.sources[idx].peek_key() else { break };
            let Ok(parsed) = parse_key(key) else {
                self.sources[idx].advance();
                continue;
            };
            if parsed.row != row {
                break;
            }
            if let Some(entry) = self.sources[idx].advance() {
                out.push(entry);
            }
        }
        out
    }

    fn drain_row(&mut self, row: &[u8]) {
        let _ = self.collect_row(row);
    }

    fn process_row(&self, row: &[u8], entries: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<Cell> {
        let mut parsed = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            let Ok(pk) = parse_key(key) else { continue };
            if !self.ctx.family_mask.contains(pk.column_family_id) {
                continue;
            }
            let revision = pk.revision();
            if revision > self.ctx.revision_snapshot {
                continue;
            }
            parsed.push(Candidate {
                column_family_id: pk.column_family_id,
                qualifier: pk.qualifier.to_vec(),
                flag: pk.flag,
                timestamp: pk.timestamp(),
                revision,
                value: value.clone(),
            });
        }

        // Dominance is resolved by timestamp, not server revision: `DELETE_ROW(ts=T)` means
        // "delete everything through logical time T", matching the worked example (§8 S2) where
        // a later-committed (and so higher-revision) delete at an *earlier* timestamp leaves
        // newer inserts untouched. Revision only bounds the scan snapshot (item 2 above); it
        // plays no role in tombstone dominance. See DESIGN.md for this resolution of the
        // ambiguity between Testable Property 3's wording and the worked examples.
        let delete_row_rev = parsed.iter()
            .filter(|c| c.flag == Flag::DeleteRow)
            .map(|c| c.timestamp)
            .max();

        let mut families: Vec<u8> = parsed.iter().map(|c| c.column_family_id).collect();
        families.sort_unstable();
        families.dedup();

        let mut out = Vec::new();
        for family in families {
            let Some(predicate) = self.ctx.predicate_for(family) else { continue };
            let family_entries: Vec<&Candidate> =
                parsed.iter().filter(|c| c.column_family_id == family).collect();

            let delete_family_rev = family_entries.iter()
                .filter(|c| c.flag == Flag::DeleteColumnFamily)
                .map(|c| c.timestamp)
                .max();
            let family_floor = [delete_row_rev, delete_family_rev].into_iter().flatten().max();

            let mut qualifiers: Vec<Vec<u8>> =
                family_entries.iter().map(|c| c.qualifier.clone()).collect();
            qualifiers.sort();
            qualifiers.dedup();

            for qualifier in qualifiers {
                if !predicate.qualifier.matches(&qualifier) {
                    continue;
                }
                let qualifier_entries: Vec<&&Candidate> =
                    family_entries.iter().filter(|c| c.qualifier == qualifier).collect();

                let delete_cell_rev = qualifier_entries.iter()
                    .filter(|c| c.flag == Flag::DeleteCell)
                    .map(|c| c.timestamp)
                    .max();
                let qualifier_floor = [family_floor, delete_cell_rev].into_iter().flatten().max();

                let delete_versions: Vec<(i64, i64)> = qualifier_entries.iter()
                    .filter(|c| c.flag == Flag::DeleteCellVersion)
                    .map(|c| (c.timestamp, c.revision))
                    .collect();

                let mut inserts: Vec<&&Candidate> =
                    qualifier_entries.iter().filter(|c| c.flag == Flag::Insert).collect();
                inserts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.revision.cmp(&a.revision)));

                if predicate.is_counter {
                    self.fold_counter(row, family, &qualifier, &inserts, qualifier_floor, &mut out);
                    continue;
                }

                let mut emitted = 0_u32;
                for insert in inserts {
                    if emitted >= predicate.max_versions {
                        break;
                    }
                    if let Some(floor) = qualifier_floor {
                        if insert.timestamp <= floor {
                            continue;
                        }
                    }
                    if delete_versions.iter().any(|&(ts, rev)| ts == insert.timestamp && rev >= insert.revision) {
                        continue;
                    }
                    if let Some(ttl_seconds) = predicate.ttl_seconds {
                        #[expect(clippy::as_conversions, reason = "ttl_seconds is a small config value")]
                        let ttl_nanos = (ttl_seconds as i64).saturating_mul(1_000_000_000);
                        if insert.timestamp < self.now_nanos.saturating_sub(ttl_nanos) {
                            continue;
                        }
                    }
                    if let Some(start) = self.ctx.start_time {
                        if insert.timestamp < start {
                            continue;
                        }
                    }
                    if let Some(end) = self.ctx.end_time {
                        if insert.timestamp >= end {
                            continue;
                        }
                    }
                    if !self.ctx.value_matches(&insert.value) {
                        continue;
                    }
                    out.push(Cell {
                        row: row.to_vec(),
                        column_family_id: family,
                        qualifier: qualifier.clone(),
                        timestamp: insert.timestamp,
                        revision: insert.revision,
                        flag: Flag::Insert,
                        value: insert.value.clone(),
                    });
                    emitted += 1;
                }

                if self.ctx.return_deletes {
                    for entry in qualifier_entries.iter().filter(|c| c.flag.is_delete()) {
                        out.push(Cell {
                            row: row.to_vec(),
                            column_family_id: family,
                            qualifier: qualifier.clone(),
                            timestamp: entry.timestamp,
                            revision: entry.revision,
                            flag: entry.flag,
                            value: entry.value.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// Counter folding (§3, §4.4 item 6): sums `+` inserts from newest to oldest until a `=`
    /// reset is hit (inclusive), emitting one synthetic insert carrying the accumulated value
    /// rendered as ASCII decimal text.
    fn fold_counter(
        &self,
        row:       &[u8],
        family:    u8,
        qualifier: &[u8],
        inserts:   &[&&Candidate],
        floor:     Option<i64>,
        out:       &mut Vec<Cell>,
    ) {
        let mut amount = 0_i64;
        let mut folded_any = false;
        let mut newest: Option<(i64, i64)> = None;

        for insert in inserts {
            if let Some(floor) = floor {
                if insert.timestamp <= floor {
                    break;
                }
            }
            let Some(counter) = CounterValue::decode(&insert.value) else { continue };
            if newest.is_none() {
                newest = Some((insert.timestamp, insert.revision));
            }
            amount = amount.saturating_add(counter.amount);
            folded_any = true;
            if counter.op == CounterOp::Reset {
                break;
            }
        }

        if let (true, Some((timestamp, revision))) = (folded_any, newest) {
            out.push(Cell {
                row: row.to_vec(),
                column_family_id: family,
                qualifier: qualifier.to_vec(),
                timestamp,
                revision,
                flag: Flag::Insert,
                value: CounterValue::render_ascii(amount).into_bytes(),
            });
        }
    }
}
