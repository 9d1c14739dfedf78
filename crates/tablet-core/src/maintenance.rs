//! The maintenance scheduler (§4.11, §5 "Shared resources"): periodically scores every loaded
//! range's access groups and submits a bounded top-K set of candidate actions -- freeze/flush,
//! compact, split, relinquish -- rather than reacting to each range in isolation.
//!
//! Like [`crate::update_pipeline`], this models the specification's worker pool as synchronous
//! calls rather than real background threads: [`MaintenanceScheduler::plan`] scores and ranks,
//! and the caller (ultimately [`crate::server`]) drives [`MaintenanceScheduler::execute`] for
//! each candidate it chooses to run, e.g. from its own worker loop or inline in a test.

use std::path::PathBuf;

use tablet_vfs::traits::WritableFilesystem;

use crate::access_group::MaintenanceData;
use crate::config::Config;
use crate::error::RangeError;
use crate::range_table::{RangeId, RangeTable};

/// One maintenance action a scheduling pass can propose for a range (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Freeze the write cache and flush the resulting immutable snapshot to a new cell store
    /// (§4.2, §4.11 "Flush"). Proposed once a range's total cache bytes cross a low watermark.
    Flush,
    /// Merge every cell store of an access group into one (§4.11 "Compact"). Proposed once an
    /// access group accumulates enough small stores that scan fan-in dominates its cost.
    Compact,
    /// Split a range in two at its estimated median row (§3, §4.11 "Split"). Proposed once a
    /// range's total on-disk size crosses [`Config::split_threshold`].
    Split,
}

/// A scored maintenance candidate (§4.11): the action, the range and access group it targets (if
/// any -- a split targets the whole range), and the priority used to rank it against every other
/// candidate from the same scheduling pass. Higher priority runs first.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub range_id: RangeId,
    pub group:    Option<String>,
    pub kind:     ActionKind,
    pub priority: f64,
}

/// Gathers [`MaintenanceData`] across every loaded range and turns it into a priority-ranked,
/// top-K-bounded set of [`Candidate`] actions (§4.11, §5).
///
/// `low_memory` additionally biases scoring toward [`ActionKind::Flush`] over
/// [`ActionKind::Compact`] or [`ActionKind::Split`] (§5 "low-memory mode"): shedding cache memory
/// is cheap and immediate, while compaction and split both cost disk I/O and, for split, a
/// round trip with the placement authority.
pub struct MaintenanceScheduler {
    split_threshold:      u64,
    low_memory_watermark: f64,
    top_k:                usize,
}

impl MaintenanceScheduler {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            split_threshold:      config.split_threshold,
            low_memory_watermark: config.low_memory_watermark,
            top_k:                config.maintenance_top_k,
        }
    }

    /// Scores every range currently loaded in `ranges` and returns the top
    /// [`Config::maintenance_top_k`] candidates by priority, highest first.
    /// `memory_pressure` is the caller's current fraction of configured memory in use, compared
    /// against `low_memory_watermark` to decide whether low-memory biasing applies (§5).
    pub fn plan<Fs: WritableFilesystem + Clone>(
        &self,
        ranges:          &RangeTable<Fs>,
        memory_pressure: f64,
    ) -> Vec<Candidate> {
        let low_memory = memory_pressure >= self.low_memory_watermark;
        let mut candidates = Vec::new();

        for (range_id, range) in ranges.iter() {
            let mut range_bytes: u64 = 0;
            for (group_name, group) in range.access_groups() {
                let data = group.maintenance_data();
                range_bytes += data.store_bytes;
                candidates.extend(self.score_access_group(range_id, group_name, &data, low_memory));
            }

            if range_bytes >= self.split_threshold && range.estimate_split_row(64).is_some() {
                let priority = Self::normalize(range_bytes, self.split_threshold)
                    * if low_memory { 0.5 } else { 1.0 };
                candidates.push(Candidate {
                    range_id: range_id.clone(), group: None, kind: ActionKind::Split, priority,
                });
            }
        }

        candidates.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        candidates.truncate(self.top_k);
        candidates
    }

    fn score_access_group(
        &self,
        range_id:   &RangeId,
        group_name: &str,
        data:       &MaintenanceData,
        low_memory: bool,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if data.cache_bytes > 0 {
            #[expect(clippy::cast_precision_loss, reason = "cache_bytes fits comfortably in an f64 mantissa in practice")]
            let cache_bytes = data.cache_bytes as f64;
            let priority = (cache_bytes / (1 << 20) as f64) * if low_memory { 2.0 } else { 1.0 };
            candidates.push(Candidate {
                range_id: range_id.clone(), group: Some(group_name.to_string()),
                kind: ActionKind::Flush, priority,
            });
        }

        if data.store_count >= 2 {
            #[expect(clippy::cast_precision_loss, reason = "store_count is always small")]
            let priority = data.store_count as f64 * if low_memory { 0.5 } else { 1.0 };
            candidates.push(Candidate {
                range_id: range_id.clone(), group: Some(group_name.to_string()),
                kind: ActionKind::Compact, priority,
            });
        }

        candidates
    }

    #[expect(clippy::cast_precision_loss, reason = "byte counts here stay well under 2^53")]
    fn normalize(value: u64, threshold: u64) -> f64 {
        if threshold == 0 { return value as f64 }
        value as f64 / threshold as f64
    }

    /// Runs one candidate's action against its range. `transfer_log_dir` is only consulted for
    /// [`ActionKind::Split`] (§4.11 "Split"): the caller is expected to have already created the
    /// transfer log directory and started copying the handed-off half there before installing it,
    /// since this scheduler owns only the in-memory state machine, not the transfer log contents.
    pub fn execute<Fs: WritableFilesystem + Clone>(
        &self,
        ranges:          &mut RangeTable<Fs>,
        candidate:       &Candidate,
        transfer_log_dir: Option<PathBuf>,
    ) -> Result<(), RangeError> {
        let Some(range) = ranges.get_mut(&candidate.range_id) else { return Err(RangeError::RangeNotFound) };

        match candidate.kind {
            ActionKind::Flush => {
                let Some(name) = &candidate.group else { return Err(RangeError::RangeNotFound) };
                let group = range.access_groups_mut().find(|(n, _)| n == name)
                    .map(|(_, group)| group).ok_or(RangeError::RangeNotFound)?;
                group.freeze();
                group.flush()?;
            }
            ActionKind::Compact => {
                let Some(name) = &candidate.group else { return Err(RangeError::RangeNotFound) };
                let group = range.access_groups_mut().find(|(n, _)| n == name)
                    .map(|(_, group)| group).ok_or(RangeError::RangeNotFound)?;
                group.compact()?;
            }
            ActionKind::Split => {
                let dir = transfer_log_dir.ok_or(RangeError::RangeNotFound)?;
                range.install_split_log(dir)?;
            }
        }
        Ok(())
    }
}
