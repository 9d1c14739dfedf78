//! `Range` (§4.6, §3, §4.10): a contiguous row interval of one table, owning its access groups,
//! its metalog-persisted state, and the load/replay/split/relinquish state machine.
//!
//! A range's on-disk layout under its `dir` mirrors [`crate::access_group::AccessGroup`]'s own
//! convention: one subdirectory per access group name, each holding that access group's
//! `stores/` and `log/`. A transfer log (received during a split or relinquish handoff) uses the
//! same per-access-group subdirectory shape rooted at a separate directory, so
//! [`Range::replay_transfer_log`] can open one [`CommitLogReader`] per access group without any
//! extra indirection to route records to the right one.

use std::collections::HashMap;
use std::path::PathBuf;

use tablet_vfs::traits::WritableFilesystem;

use crate::access_group::AccessGroup;
use crate::commit_log::CommitLogReader;
use crate::error::RangeError;
use crate::key::parse_key;
use crate::merge_scanner::MergeScannerRange;
use crate::scan_context::{ScanContext, ScanSpec};
use crate::schema::TableInfo;
use crate::serialize::{read_varint32, write_varint32};


/// The range state machine (§3). Only the edges named in the specification are reachable
/// through this module's transition methods; every other state pair is rejected with
/// [`RangeError::IllegalStateTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeState {
    Steady,
    SplitLogInstalled,
    SplitShrunk,
    RelinquishLogInstalled,
    /// Transient marker for a range mid multi-server recovery; skipped on local replay (§3).
    Phantom,
}

impl RangeState {
    #[must_use]
    fn as_byte(self) -> u8 {
        match self {
            Self::Steady                 => 0,
            Self::SplitLogInstalled       => 1,
            Self::SplitShrunk             => 2,
            Self::RelinquishLogInstalled  => 3,
            Self::Phantom                 => 4,
        }
    }

    #[must_use]
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Steady),
            1 => Some(Self::SplitLogInstalled),
            2 => Some(Self::SplitShrunk),
            3 => Some(Self::RelinquishLogInstalled),
            4 => Some(Self::Phantom),
            _ => None,
        }
    }

    #[must_use]
    fn name(self) -> &'static str {
        match self {
            Self::Steady                => "STEADY",
            Self::SplitLogInstalled      => "SPLIT_LOG_INSTALLED",
            Self::SplitShrunk            => "SPLIT_SHRUNK",
            Self::RelinquishLogInstalled => "RELINQUISH_LOG_INSTALLED",
            Self::Phantom                => "PHANTOM",
        }
    }
}

/// One contiguous row interval of one table, loaded and served by this process (§3, §4.6).
pub struct Range<Fs: WritableFilesystem> {
    table_id:          String,
    schema:            TableInfo,
    start_row:         Vec<u8>,
    end_row:           Vec<u8>,
    state:             RangeState,
    load_acknowledged: bool,
    latest_revision:   i64,
    transfer_log_dir:  Option<PathBuf>,

    dir:           PathBuf,
    access_groups: HashMap<String, AccessGroup<Fs>>,

    update_count: u64,
    scan_count:   u64,
    dropping:     bool,
}

impl<Fs: WritableFilesystem + Clone> Range<Fs> {
    /// Opens a brand-new range: one access group per entry in `schema.access_groups`, each
    /// rooted at `dir/<access_group name>` (§4.2, §4.7).
    pub fn open(
        fs:        Fs,
        dir:       PathBuf,
        schema:    TableInfo,
        start_row: Vec<u8>,
        end_row:   Vec<u8>,
        roll_size: u64,
        cell_store_block_size: u64,
        bloom_false_positive_rate: f64,
    ) -> Result<Self, RangeError> {
        let table_id = schema.table_id.clone();
        let access_groups = Self::open_access_groups(
            &fs, &dir, &schema, roll_size, cell_store_block_size, bloom_false_positive_rate,
        )?;

        Ok(Self {
            table_id,
            schema,
            start_row,
            end_row,
            state: RangeState::Steady,
            load_acknowledged: false,
            latest_revision: 0,
            transfer_log_dir: None,
            dir,
            access_groups,
            update_count: 0,
            scan_count: 0,
            dropping: false,
        })
    }

    /// Rebuilds a range from its decoded `RANGE` metalog entity payload (§4.10 "Load").
    pub fn from_entity_payload(
        fs:        Fs,
        dir:       PathBuf,
        schema:    TableInfo,
        payload:   &[u8],
        roll_size: u64,
        cell_store_block_size: u64,
        bloom_false_positive_rate: f64,
    ) -> Result<Self, RangeError> {
        let (table_id, generation, start_row, end_row, state, load_acknowledged, latest_revision, transfer_log_dir) =
            decode_entity_payload(payload)?;

        if generation != schema.generation {
            return Err(RangeError::GenerationMismatch { expected: schema.generation, actual: generation });
        }
        if table_id != schema.table_id {
            return Err(RangeError::CorruptEntity);
        }

        let access_groups = Self::open_access_groups(
            &fs, &dir, &schema, roll_size, cell_store_block_size, bloom_false_positive_rate,
        )?;

        Ok(Self {
            table_id,
            schema,
            start_row,
            end_row,
            state,
            load_acknowledged,
            latest_revision,
            transfer_log_dir,
            dir,
            access_groups,
            update_count: 0,
            scan_count: 0,
            dropping: false,
        })
    }

    fn open_access_groups(
        fs: &Fs,
        dir: &std::path::Path,
        schema: &TableInfo,
        roll_size: u64,
        cell_store_block_size: u64,
        bloom_false_positive_rate: f64,
    ) -> Result<HashMap<String, AccessGroup<Fs>>, RangeError> {
        let mut access_groups = HashMap::with_capacity(schema.access_groups.len());
        for ag_schema in &schema.access_groups {
            let group = AccessGroup::open(
                fs.clone(),
                dir.join(&ag_schema.name),
                schema.clone(),
                &ag_schema.name,
                roll_size,
                cell_store_block_size,
                bloom_false_positive_rate,
            )?;
            access_groups.insert(ag_schema.name.clone(), group);
        }
        Ok(access_groups)
    }

    #[must_use]
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    #[must_use]
    pub fn start_row(&self) -> &[u8] {
        &self.start_row
    }

    #[must_use]
    pub fn end_row(&self) -> &[u8] {
        &self.end_row
    }

    #[must_use]
    pub fn state(&self) -> RangeState {
        self.state
    }

    #[must_use]
    pub fn load_acknowledged(&self) -> bool {
        self.load_acknowledged
    }

    #[must_use]
    pub fn latest_revision(&self) -> i64 {
        self.latest_revision
    }

    /// Serializes this range's state for its `RANGE` metalog entity (§4.9, §6 "Metalog on-disk
    /// format").
    #[must_use]
    pub fn encode_entity_payload(&self) -> Vec<u8> {
        encode_entity_payload(
            &self.table_id, self.schema.generation, &self.start_row, &self.end_row,
            self.state, self.load_acknowledged, self.latest_revision, self.transfer_log_dir.as_deref(),
        )
    }

    /// Gates admission of a new update against this range; returns `false` once the range is
    /// being dropped or relinquished, so the caller should route the update elsewhere (§4.6).
    pub fn increment_update_counter(&mut self) -> bool {
        if self.dropping {
            return false;
        }
        self.update_count += 1;
        true
    }

    pub fn decrement_update_counter(&mut self) {
        self.update_count = self.update_count.saturating_sub(1);
    }

    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn increment_scan_counter(&mut self) {
        self.scan_count += 1;
    }

    pub fn decrement_scan_counter(&mut self) {
        self.scan_count = self.scan_count.saturating_sub(1);
    }

    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scan_count
    }

    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.update_count == 0 && self.scan_count == 0
    }

    /// Inserts one already-durable cell into the matching access group's write cache (§4.6
    /// `add`). `schema_generation` is the generation the caller qualified the update against;
    /// a mismatch means the client's schema is stale.
    pub fn add(&mut self, schema_generation: u32, key: &[u8], value: &[u8], revision: i64) -> Result<(), RangeError> {
        if schema_generation != self.schema.generation {
            return Err(RangeError::GenerationMismatch { expected: self.schema.generation, actual: schema_generation });
        }
        self.observe_revision(revision)?;

        let parsed = parse_key(key)?;
        let group = self.access_group_for_family_mut(parsed.column_family_id)?;
        group.add(key, value, parsed.flag.is_delete());
        Ok(())
    }

    /// Advances `latest_revision`, rejecting any revision smaller than what this range has
    /// already observed (§3 clock-skew guard, §8 S4).
    fn observe_revision(&mut self, revision: i64) -> Result<(), RangeError> {
        if revision < self.latest_revision {
            return Err(RangeError::ClockSkew { assigned: revision, latest: self.latest_revision });
        }
        self.latest_revision = revision;
        Ok(())
    }

    fn access_group_for_family_mut(&mut self, column_family_id: u8) -> Result<&mut AccessGroup<Fs>, RangeError> {
        let cf = self.schema.column_family(column_family_id)
            .ok_or(RangeError::UnknownColumnFamily(column_family_id))?;
        self.access_groups.get_mut(&cf.access_group).ok_or(RangeError::UnknownColumnFamily(column_family_id))
    }

    /// Stage 2 of the update pipeline, "Commit" (§4.8): durably appends every mutation in
    /// `batch` to its owning access group's commit log, one block per access group so a block's
    /// revision range accurately covers only the mutations it actually carries. Does not sync;
    /// the caller (the [`crate::update_pipeline`]) decides sync timing per this range's
    /// [`crate::schema::LogClass`] via [`Self::sync_commit_logs`].
    pub fn commit_batch(
        &mut self,
        schema_generation: u32,
        batch: &[(Vec<u8>, Vec<u8>, i64)],
    ) -> Result<(), RangeError> {
        if schema_generation != self.schema.generation {
            return Err(RangeError::GenerationMismatch { expected: self.schema.generation, actual: schema_generation });
        }

        let mut by_group: HashMap<String, PerGroupBatch> = HashMap::new();
        for (key, value, revision) in batch {
            let parsed = parse_key(key)?;
            let cf = self.schema.column_family(parsed.column_family_id)
                .ok_or(RangeError::UnknownColumnFamily(parsed.column_family_id))?;
            let entry = by_group.entry(cf.access_group.clone())
                .or_insert_with(|| PerGroupBatch { mutations: Vec::new(), rev_min: *revision, rev_max: *revision });
            entry.mutations.push((key.clone(), value.clone()));
            entry.rev_min = entry.rev_min.min(*revision);
            entry.rev_max = entry.rev_max.max(*revision);
        }

        for (name, group_batch) in by_group {
            let payload = encode_mutation_batch(&group_batch.mutations);
            let group = self.access_groups.get_mut(&name).ok_or(RangeError::RangeNotFound)?;
            group.commit_log_mut().append(group_batch.rev_min, group_batch.rev_max, &payload)?;
        }
        Ok(())
    }

    /// Flushes every access group's commit log durably (§4.8 "Commit"). Root/metadata/system
    /// tables call this after every [`Self::commit_batch`]; the user log's caller instead calls
    /// it once per coalesced group-commit window.
    pub fn sync_commit_logs(&mut self) -> Result<(), RangeError> {
        for group in self.access_groups.values_mut() {
            group.commit_log_mut().sync()?;
        }
        Ok(())
    }

    /// Stage 3 of the update pipeline, "Apply" (§4.8): inserts every mutation already durable
    /// via [`Self::commit_batch`] into its access group's write cache. An apply failure here is
    /// always fatal (§4.8) since the durable log is the only source of truth once commit has
    /// returned; callers should treat any `Err` from this method as unrecoverable.
    pub fn apply_batch(&mut self, schema_generation: u32, batch: &[(Vec<u8>, Vec<u8>, i64)]) -> Result<(), RangeError> {
        for (key, value, revision) in batch {
            self.add(schema_generation, key, value, *revision)?;
        }
        Ok(())
    }

    /// Picks a split point from a coarse histogram over every access group's caches (§4.2, §4.11
    /// "Split"): the median of the merged, deduplicated row samples. Returns `None` if there are
    /// fewer than two distinct rows to split between.
    #[must_use]
    pub fn estimate_split_row(&self, sample_limit: usize) -> Option<Vec<u8>> {
        let mut rows: Vec<Vec<u8>> = self.access_groups.values()
            .flat_map(|group| group.split_row_estimate_data(sample_limit))
            .collect();
        rows.sort_unstable();
        rows.dedup();
        if rows.len() < 2 {
            return None;
        }
        Some(rows.swap_remove(rows.len() / 2))
    }

    /// Builds a range-level merge scanner spanning every access group the compiled scan touches
    /// (§4.6 `create_scanner`, §4.4). `RANGE_NOT_FOUND` if this range's boundaries have since
    /// shrunk out from under a scan that predates the shrink, or the range is a transient
    /// `PHANTOM` placeholder.
    pub fn create_scanner(&self, spec: &ScanSpec, now_nanos: i64) -> Result<MergeScannerRange, RangeError> {
        if self.state == RangeState::Phantom {
            return Err(RangeError::RangeNotFound);
        }

        let ctx = ScanContext::compile(spec, &self.schema)?;
        let mut groups = Vec::with_capacity(self.schema.access_groups.len());
        for ag_schema in &self.schema.access_groups {
            if !ag_schema.column_family_ids.iter().any(|&id| ctx.family_mask.contains(id)) {
                continue;
            }
            let Some(group) = self.access_groups.get(&ag_schema.name) else { continue };
            groups.push(group.create_scanner(ctx.clone(), now_nanos)?);
        }

        Ok(MergeScannerRange::new(groups, spec.row_limit, spec.cell_limit))
    }

    /// Applies every mutation batch replayed from a transfer log to the matching access group,
    /// bypassing the commit log since these records are already durable there (§4.6
    /// `replay_transfer_log`, §4.10 "Load"). The transfer log directory is expected to contain
    /// one subdirectory per access group, matching this range's own on-disk layout.
    pub fn replay_transfer_log(&mut self, fs: Fs, transfer_dir: &std::path::Path) -> Result<(), RangeError> {
        for (name, group) in &mut self.access_groups {
            let ag_dir = transfer_dir.join(name);
            let mut reader = CommitLogReader::new(fs.clone(), ag_dir);
            let blocks = reader.replay()?;
            for block in blocks {
                let mutations = decode_mutation_batch(&block.payload)?;
                for (key, value) in mutations {
                    group.apply_replayed_cell(&key, &value);
                }
            }
        }
        Ok(())
    }

    /// Links a transfer log already replayed by [`Self::replay_transfer_log`] into every access
    /// group's own commit log, so future recovery covers it without replaying it again, then
    /// records the link for this range's metalog entity (§4.7 "Linking a transfer log", §4.10
    /// "Load").
    pub fn link_transfer_log(&mut self, transfer_dir: PathBuf) -> Result<(), RangeError> {
        for (name, group) in &mut self.access_groups {
            group.commit_log_mut().link_log(&transfer_dir.join(name))?;
        }
        self.transfer_log_dir = Some(transfer_dir);
        Ok(())
    }

    /// `STEADY -> SPLIT_LOG_INSTALLED` (§3): a transfer log has been created for the half being
    /// handed off, and the split point chosen; `transfer_dir` is recorded for the next metalog
    /// write.
    pub fn install_split_log(&mut self, transfer_dir: PathBuf) -> Result<(), RangeError> {
        self.require_state(RangeState::Steady, RangeState::SplitLogInstalled)?;
        self.transfer_log_dir = Some(transfer_dir);
        self.state = RangeState::SplitLogInstalled;
        Ok(())
    }

    /// `SPLIT_LOG_INSTALLED -> SPLIT_SHRUNK` (§3): the peer has taken its half; this range's
    /// boundary shrinks to `new_start_row` or `new_end_row` (whichever side was handed off).
    pub fn shrink_after_split(&mut self, new_start_row: Vec<u8>, new_end_row: Vec<u8>) -> Result<(), RangeError> {
        self.require_state(RangeState::SplitLogInstalled, RangeState::SplitShrunk)?;
        self.start_row = new_start_row;
        self.end_row = new_end_row;
        self.state = RangeState::SplitShrunk;
        Ok(())
    }

    /// `SPLIT_SHRUNK -> STEADY` (§3): acknowledgement received from the external placement
    /// authority; the caller is expected to enqueue a `TASK_REMOVE_TRANSFER_LOG` entity
    /// alongside this transition.
    pub fn finish_split(&mut self) -> Result<(), RangeError> {
        self.require_state(RangeState::SplitShrunk, RangeState::Steady)?;
        self.state = RangeState::Steady;
        Ok(())
    }

    /// `STEADY -> RELINQUISH_LOG_INSTALLED` (§3): the range packages its state in preparation for
    /// handing the whole range over; the caller removes it from the live map once the
    /// `TASK_ACKNOWLEDGE_RELINQUISH` task has been durably enqueued.
    pub fn install_relinquish_log(&mut self) -> Result<(), RangeError> {
        self.require_state(RangeState::Steady, RangeState::RelinquishLogInstalled)?;
        self.state = RangeState::RelinquishLogInstalled;
        self.dropping = true;
        Ok(())
    }

    fn require_state(&self, expected: RangeState, target: RangeState) -> Result<(), RangeError> {
        if self.state != expected {
            return Err(RangeError::IllegalStateTransition { from: self.state.name(), to: target.name() });
        }
        Ok(())
    }

    /// Diagnostic accounting across every access group, for the maintenance scheduler (§4.11).
    #[must_use]
    pub fn access_groups(&self) -> impl Iterator<Item = (&str, &AccessGroup<Fs>)> {
        self.access_groups.iter().map(|(name, group)| (name.as_str(), group))
    }

    #[must_use]
    pub fn access_groups_mut(&mut self) -> impl Iterator<Item = (&str, &mut AccessGroup<Fs>)> {
        self.access_groups.iter_mut().map(|(name, group)| (name.as_str(), group))
    }
}

/// One access group's share of a [`Range::commit_batch`] call, accumulated while grouping a
/// mixed-family batch by destination access group.
struct PerGroupBatch {
    mutations: Vec<(Vec<u8>, Vec<u8>)>,
    rev_min:   i64,
    rev_max:   i64,
}

/// Appends one mutation batch to a commit log block payload (§4.8 "Commit"): a sequence of
/// `(varint key_len, key, varint value_len, value)` records, used both by the update pipeline's
/// commit stage and by [`Range::replay_transfer_log`]'s inverse, [`decode_mutation_batch`].
#[must_use]
pub fn encode_mutation_batch(mutations: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (key, value) in mutations {
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "keys/values stay well under u32::MAX")]
        write_varint32(&mut buf, key.len() as u32);
        buf.extend_from_slice(key);
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "keys/values stay well under u32::MAX")]
        write_varint32(&mut buf, value.len() as u32);
        buf.extend_from_slice(value);
    }
    buf
}

/// Decodes a payload written by [`encode_mutation_batch`]. Raises [`RangeError::RequestTruncated`]
/// on a short read (§4.6 `replay_transfer_log` error table).
pub fn decode_mutation_batch(payload: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RangeError> {
    let mut mutations = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let (key_len, after_key_len) = read_varint32(rest).map_err(|_| RangeError::RequestTruncated)?;
        let key_len = key_len as usize;
        if after_key_len.len() < key_len {
            return Err(RangeError::RequestTruncated);
        }
        let (key, after_key) = after_key_len.split_at(key_len);

        let (value_len, after_value_len) = read_varint32(after_key).map_err(|_| RangeError::RequestTruncated)?;
        let value_len = value_len as usize;
        if after_value_len.len() < value_len {
            return Err(RangeError::RequestTruncated);
        }
        let (value, after_value) = after_value_len.split_at(value_len);

        mutations.push((key.to_vec(), value.to_vec()));
        rest = after_value;
    }
    Ok(mutations)
}

#[expect(clippy::too_many_arguments, reason = "mirrors the flat RANGE entity payload; a builder would only obscure the 1:1 field mapping")]
fn encode_entity_payload(
    table_id:          &str,
    generation:        u32,
    start_row:         &[u8],
    end_row:           &[u8],
    state:             RangeState,
    load_acknowledged: bool,
    latest_revision:   i64,
    transfer_log_dir:  Option<&std::path::Path>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint32(&mut buf, 1); // encoding version
    crate::serialize::write_nul_terminated_string(&mut buf, table_id);
    buf.extend_from_slice(&generation.to_le_bytes());
    write_len_prefixed(&mut buf, start_row);
    write_len_prefixed(&mut buf, end_row);
    buf.push(state.as_byte());
    buf.push(u8::from(load_acknowledged));
    buf.extend_from_slice(&latest_revision.to_le_bytes());
    match transfer_log_dir {
        Some(dir) => {
            buf.push(1);
            crate::serialize::write_nul_terminated_string(&mut buf, &dir.to_string_lossy());
        }
        None => buf.push(0),
    }
    buf
}

#[expect(clippy::type_complexity, reason = "this is the flat RANGE entity payload; splitting it would just move the field list elsewhere")]
fn decode_entity_payload(
    payload: &[u8],
) -> Result<(String, u32, Vec<u8>, Vec<u8>, RangeState, bool, i64, Option<PathBuf>), RangeError> {
    let (_version, rest) = read_varint32(payload).map_err(|_| RangeError::CorruptEntity)?;
    let (table_id, rest) = crate::serialize::read_nul_terminated_string(rest).map_err(|_| RangeError::CorruptEntity)?;
    let table_id = table_id.to_string();

    let generation_bytes: [u8; 4] = rest.get(..4).ok_or(RangeError::CorruptEntity)?.try_into().map_err(|_| RangeError::CorruptEntity)?;
    let generation = u32::from_le_bytes(generation_bytes);
    let rest = rest.get(4..).ok_or(RangeError::CorruptEntity)?;

    let (start_row, rest) = read_len_prefixed(rest)?;
    let (end_row, rest) = read_len_prefixed(rest)?;

    let (&state_byte, rest) = rest.split_first().ok_or(RangeError::CorruptEntity)?;
    let state = RangeState::from_byte(state_byte).ok_or(RangeError::CorruptEntity)?;

    let (&ack_byte, rest) = rest.split_first().ok_or(RangeError::CorruptEntity)?;
    let load_acknowledged = ack_byte != 0;

    let revision_bytes: [u8; 8] = rest.get(..8).ok_or(RangeError::CorruptEntity)?.try_into().map_err(|_| RangeError::CorruptEntity)?;
    let latest_revision = i64::from_le_bytes(revision_bytes);
    let rest = rest.get(8..).ok_or(RangeError::CorruptEntity)?;

    let (&has_transfer_log, rest) = rest.split_first().ok_or(RangeError::CorruptEntity)?;
    let transfer_log_dir = if has_transfer_log != 0 {
        let (dir, _rest) = crate::serialize::read_nul_terminated_string(rest).map_err(|_| RangeError::CorruptEntity)?;
        Some(PathBuf::from(dir))
    } else {
        None
    };

    Ok((table_id, generation, start_row, end_row, state, load_acknowledged, latest_revision, transfer_log_dir))
}

/// Reads just the `table_id` field out of a `RANGE` metalog entity payload, without requiring
/// the schema [`Range::from_entity_payload`] otherwise needs (§4.10 "Load"): recovery has to know
/// which table a payload belongs to before it can look up that table's schema to fully decode it.
pub fn peek_table_id(payload: &[u8]) -> Result<String, RangeError> {
    let (_version, rest) = read_varint32(payload).map_err(|_| RangeError::CorruptEntity)?;
    let (table_id, _rest) = crate::serialize::read_nul_terminated_string(rest).map_err(|_| RangeError::CorruptEntity)?;
    Ok(table_id.to_string())
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "row keys stay well under u32::MAX")]
    write_varint32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn read_len_prefixed(buf: &[u8]) -> Result<(Vec<u8>, &[u8]), RangeError> {
    let (len, rest) = read_varint32(buf).map_err(|_| RangeError::CorruptEntity)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(RangeError::CorruptEntity);
    }
    let (field, remaining) = rest.split_at(len);
    Ok((field.to_vec(), remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Flag;
    use crate::key::{write_key, TimeOrder};
    use crate::schema::{AccessGroupSchema, ColumnFamily, TableSchema};
    use std::sync::Arc;
    use tablet_vfs::{SharedFs, ThreadLocalMemoryFS};

    fn schema() -> TableInfo {
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
            log_class: crate::schema::LogClass::User,
        })
    }

    fn open_range() -> Range<SharedFs<ThreadLocalMemoryFS>> {
        let fs = SharedFs::new(ThreadLocalMemoryFS::new());
        Range::open(fs, PathBuf::from("/r1"), schema(), b"a".to_vec(), b"z".to_vec(), 1 << 20, 1 << 16, 0.01).unwrap()
    }

    fn key_for(row: &[u8], ts: i64, rev: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_key(&mut buf, row, 0, b"q", Flag::Insert, ts, rev, TimeOrder::Descending).unwrap();
        buf
    }

    #[test]
    fn entity_payload_round_trips() {
        let mut range = open_range();
        range.add(1, &key_for(b"m", 100, 1), b"v", 1).unwrap();
        range.install_split_log(PathBuf::from("/transfer")).unwrap();

        let payload = range.encode_entity_payload();
        let (table_id, generation, start_row, end_row, state, load_ack, latest_revision, transfer_dir) =
            decode_entity_payload(&payload).unwrap();
        assert_eq!(table_id, "t");
        assert_eq!(generation, 1);
        assert_eq!(start_row, b"a");
        assert_eq!(end_row, b"z");
        assert_eq!(state, RangeState::SplitLogInstalled);
        assert!(!load_ack);
        assert_eq!(latest_revision, 1);
        assert_eq!(transfer_dir, Some(PathBuf::from("/transfer")));
    }

    #[test]
    fn add_rejects_generation_mismatch() {
        let mut range = open_range();
        let err = range.add(2, &key_for(b"m", 100, 1), b"v", 1).unwrap_err();
        assert!(matches!(err, RangeError::GenerationMismatch { expected: 1, actual: 2 }));
    }

    #[test]
    fn add_rejects_revision_below_latest() {
        let mut range = open_range();
        range.add(1, &key_for(b"m", 100, 5), b"v", 5).unwrap();
        let err = range.add(1, &key_for(b"m", 100, 2), b"v", 2).unwrap_err();
        assert!(matches!(err, RangeError::ClockSkew { assigned: 2, latest: 5 }));
    }

    #[test]
    fn create_scanner_sees_added_cells() {
        let mut range = open_range();
        range.add(1, &key_for(b"m", 100, 1), b"v", 1).unwrap();

        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };
        let mut scanner = range.create_scanner(&spec, 0).unwrap();
        let row = scanner.next_row().unwrap();
        assert_eq!(row.row, b"m");
    }

    #[test]
    fn create_scanner_rejects_phantom_ranges() {
        let mut range = open_range();
        range.state = RangeState::Phantom;
        let spec = ScanSpec::default();
        assert!(matches!(range.create_scanner(&spec, 0), Err(RangeError::RangeNotFound)));
    }

    #[test]
    fn split_state_machine_follows_legal_edges() {
        let mut range = open_range();
        range.install_split_log(PathBuf::from("/transfer")).unwrap();
        assert_eq!(range.state(), RangeState::SplitLogInstalled);
        range.shrink_after_split(b"a".to_vec(), b"m".to_vec()).unwrap();
        assert_eq!(range.state(), RangeState::SplitShrunk);
        range.finish_split().unwrap();
        assert_eq!(range.state(), RangeState::Steady);
    }

    #[test]
    fn split_state_machine_rejects_illegal_edges() {
        let mut range = open_range();
        let err = range.finish_split().unwrap_err();
        assert!(matches!(err, RangeError::IllegalStateTransition { .. }));
    }

    #[test]
    fn relinquish_marks_range_as_dropping() {
        let mut range = open_range();
        range.install_relinquish_log().unwrap();
        assert_eq!(range.state(), RangeState::RelinquishLogInstalled);
        assert!(!range.increment_update_counter(), "dropping range refuses new updates");
    }

    #[test]
    fn commit_then_apply_makes_cells_visible_and_durable() {
        let mut range = open_range();
        let key = key_for(b"m", 100, 1);
        let batch = vec![(key.clone(), b"v".to_vec(), 1)];

        range.commit_batch(1, &batch).unwrap();
        range.sync_commit_logs().unwrap();
        range.apply_batch(1, &batch).unwrap();

        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };
        let mut scanner = range.create_scanner(&spec, 0).unwrap();
        let row = scanner.next_row().unwrap();
        assert_eq!(row.row, b"m");
        assert_eq!(row.cells[0].value, b"v");
    }

    #[test]
    fn estimate_split_row_picks_the_median_of_distinct_rows() {
        let mut range = open_range();
        for (row, rev) in [(b"a" as &[u8], 1), (b"m", 2), (b"z", 3)] {
            range.add(1, &key_for(row, 100, rev), b"v", rev).unwrap();
        }
        let split_row = range.estimate_split_row(100).unwrap();
        assert_eq!(split_row, b"m");
    }

    #[test]
    fn mutation_batch_round_trips() {
        let batch = vec![(b"k1".to_vec(), b"v1".to_vec()), (b"k2".to_vec(), b"v2".to_vec())];
        let encoded = encode_mutation_batch(&batch);
        let decoded = decode_mutation_batch(&encoded).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn replay_transfer_log_applies_cells_to_matching_access_group() {
        let fs = SharedFs::new(ThreadLocalMemoryFS::new());
        let mut range = Range::open(
            fs.clone(), PathBuf::from("/r1"), schema(), b"a".to_vec(), b"z".to_vec(), 1 << 20, 1 << 16, 0.01,
        ).unwrap();

        let transfer_dir = PathBuf::from("/transfer");
        let mut writer = crate::commit_log::CommitLogWriter::open(fs, transfer_dir.join("default"), 1 << 20).unwrap();
        let key = key_for(b"m", 100, 1);
        let batch = encode_mutation_batch(&[(key, b"migrated".to_vec())]);
        writer.append(1, 1, &batch).unwrap();
        writer.sync().unwrap();

        range.replay_transfer_log(writer.into_fs(), &transfer_dir).unwrap();

        let spec = ScanSpec { revision_snapshot: i64::MAX, ..Default::default() };
        let mut scanner = range.create_scanner(&spec, 0).unwrap();
        let row = scanner.next_row().unwrap();
        assert_eq!(row.row, b"m");
        assert_eq!(row.cells[0].value, b"migrated");
    }
}
