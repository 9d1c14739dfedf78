//! `ServerContext` (§4.10, §5 "Shared resources"): the range server process's top-level state,
//! composing the metalog, the loaded-range arena, the update pipeline, the maintenance
//! scheduler, and the scanner registry, and driving recovery on startup.
//!
//! Schema distribution -- how a range server learns a table's [`crate::schema::TableSchema`] in
//! the first place -- is explicitly out of scope (§1, "Schema authoring tooling"): a real
//! deployment would read it from a metadata table this same engine serves. [`ServerContext::new`]
//! therefore takes the schemas it should recover against as a precondition rather than bootstrapping
//! them, same as [`crate::range_table::RangeTable`] only ever routes against already-loaded ranges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tablet_vfs::traits::WritableFilesystem;
use tracing::{debug, info, warn};

use crate::clock::WallClock;
use crate::config::Config;
use crate::error::{RangeError, TabletError};
use crate::maintenance::{Candidate, MaintenanceScheduler};
use crate::metalog::{EntityType, MetaLogReader, MetaLogWriter};
use crate::range::{self, Range};
use crate::range_table::{RangeId, RangeTable};
use crate::scan_context::ScanSpec;
use crate::scanner_registry::{ScanBlock, ScannerId, ScannerRegistry};
use crate::schema::TableInfo;
use crate::update_pipeline::{BatchOutcome, RawMutation, UpdatePipeline};

const METALOG_NAME: &str = "server";
const METALOG_VERSION: i32 = 1;

/// The range server process's composed, in-memory state (§4.10, §5).
pub struct ServerContext<Fs: WritableFilesystem + Clone, C: WallClock> {
    config:  Config,
    fs:      Fs,
    dir:     PathBuf,
    metalog: MetaLogWriter<Fs>,
    schemas: HashMap<String, TableInfo>,
    ranges:  RangeTable<Fs>,
    pipeline: UpdatePipeline<C>,
    maintenance: MaintenanceScheduler,
    scanners: ScannerRegistry<Fs>,
    next_entity_id: i64,
    /// Tracks which metalog entity id backs each live range, so a later re-persist of its
    /// `RANGE` entity (e.g. after [`Self::execute_maintenance`] changes its boundary) collapses
    /// onto the same id instead of leaking a duplicate (§4.9 "collapsing by id").
    range_entity_ids: HashMap<RangeId, i64>,
}

impl<Fs: WritableFilesystem + Clone, C: WallClock> ServerContext<Fs, C> {
    /// Opens (or initializes) this server's metalog under `dir` and replays whatever ranges it
    /// already held, in recovery order (§4.10 "Load"): root, then metadata, then system, then
    /// user tables, since each earlier class's ranges carry the location metadata a later class's
    /// loading depends on. `schemas` must already contain every table id any recovered range
    /// entity names, or recovery fails with [`RangeError::UnknownColumnFamily`]-adjacent
    /// [`TabletError::TableNotFound`].
    pub fn new(
        fs:         Fs,
        dir:        PathBuf,
        config:     Config,
        wall_clock: C,
        schemas:    HashMap<String, TableInfo>,
        timestamp:  i64,
    ) -> Result<Self, TabletError> {
        let metalog_dir = dir.join("metalog");
        let reader = MetaLogReader::new(fs.clone(), metalog_dir.clone(), METALOG_NAME.to_string(), METALOG_VERSION);

        let (state, is_fresh) = match reader.read() {
            Ok(state) => (state, false),
            Err(crate::error::MetaLogError::MissingRecoverEntity) => {
                (crate::metalog::MetaLogState::default(), true)
            }
            Err(err) => return Err(TabletError::from(err)),
        };

        if is_fresh {
            info!(dir = %dir.display(), "initializing a fresh range server metalog");
        } else {
            info!(dir = %dir.display(), entities = state.entities.len(), "recovering range server metalog");
        }

        let mut ranges = RangeTable::new();
        let mut range_entities = Vec::new();
        let mut task_entities = Vec::new();
        let mut max_id = 0_i64;
        let mut range_entity_ids = HashMap::new();

        for entity in state.entities.values() {
            max_id = max_id.max(entity.header.id);
            match entity.header.entity_type {
                EntityType::Range => range_entities.push(entity.clone()),
                EntityType::TaskRemoveTransferLog | EntityType::TaskAcknowledgeRelinquish => {
                    task_entities.push(entity.clone());
                }
                EntityType::Recover => {}
            }
        }

        // Recovery order (§4.10): root, metadata, system, user. A payload's table isn't known
        // until it's peeked, so sort after resolving each entity's schema rather than before.
        let mut resolved: Vec<(TableInfo, crate::metalog::Entity)> = Vec::with_capacity(range_entities.len());
        for entity in range_entities {
            let table_id = range::peek_table_id(&entity.payload).map_err(RangeError::from)?;
            let schema = schemas.get(&table_id).cloned()
                .ok_or_else(|| TabletError::TableNotFound(table_id.clone()))?;
            resolved.push((schema, entity));
        }
        resolved.sort_by_key(|(schema, _)| schema.log_class.recovery_order());

        for (schema, entity) in resolved {
            let range_dir = Self::range_dir(&dir, &schema.table_id, entity.header.id);
            let loaded = Range::from_entity_payload(
                fs.clone(), range_dir, schema.clone(), &entity.payload,
                config.commit_log_roll_size, config.cell_store_block_size,
                config.bloom_filter_false_positive_rate,
            )?;
            debug!(table = %schema.table_id, start = ?loaded.start_row(), "range recovered");
            let range_id: RangeId = (schema.table_id.clone(), loaded.start_row().to_vec());
            range_entity_ids.insert(range_id, entity.header.id);
            ranges.insert(loaded);
        }

        for task in &task_entities {
            warn!(
                entity_type = ?task.header.entity_type, id = task.header.id,
                "pending recovery task left over from a prior run; caller must resolve it",
            );
        }

        let metalog = MetaLogWriter::open(
            fs.clone(), metalog_dir, METALOG_NAME.to_string(), METALOG_VERSION,
            config.metalog_history_size, state.into_entities(), timestamp,
        )?;

        let pipeline = UpdatePipeline::new(wall_clock, &config);
        let maintenance = MaintenanceScheduler::new(&config);
        let scanners = ScannerRegistry::new(config.scanner_ttl_ms);

        Ok(Self {
            config, fs, dir, metalog, schemas, ranges, pipeline, maintenance, scanners,
            next_entity_id: max_id + 1,
            range_entity_ids,
        })
    }

    fn range_dir(base: &Path, table_id: &str, entity_id: i64) -> PathBuf {
        base.join("ranges").join(table_id).join(entity_id.to_string())
    }

    /// Registers a table's schema so ranges of it can be opened or recovered (§1 "out of scope:
    /// schema authoring tooling" -- distribution of the schema itself is the caller's job).
    pub fn register_schema(&mut self, schema: TableInfo) {
        self.schemas.insert(schema.table_id.clone(), schema);
    }

    /// Opens a brand-new range this server has just been assigned by the placement authority,
    /// persists its initial `RANGE` metalog entity, and admits it into the live map (§4.10
    /// "Load", non-recovery path).
    pub fn load_range(
        &mut self,
        table_id:  &str,
        start_row: Vec<u8>,
        end_row:   Vec<u8>,
        timestamp: i64,
    ) -> Result<RangeId, TabletError> {
        let schema = self.schemas.get(table_id).cloned()
            .ok_or_else(|| TabletError::TableNotFound(table_id.to_string()))?;

        let id = self.next_entity_id;
        self.next_entity_id += 1;
        let dir = Self::range_dir(&self.dir, table_id, id);

        let range = Range::open(
            self.fs.clone(), dir, schema, start_row, end_row,
            self.config.commit_log_roll_size, self.config.cell_store_block_size,
            self.config.bloom_filter_false_positive_rate,
        )?;

        self.metalog.put(EntityType::Range, id, timestamp, range.encode_entity_payload())?;
        let range_id: RangeId = (table_id.to_string(), range.start_row().to_vec());
        self.range_entity_ids.insert(range_id.clone(), id);
        self.ranges.insert(range);
        info!(table = table_id, id, "range loaded");
        Ok(range_id)
    }

    /// Runs the qualify/commit/apply pipeline for one batch against `table_id` (§4.8).
    pub fn process_batch(
        &mut self,
        table_id:          &str,
        schema_generation: u32,
        mutations:         Vec<RawMutation>,
    ) -> Result<BatchOutcome, TabletError> {
        let schema = self.schemas.get(table_id).cloned()
            .ok_or_else(|| TabletError::TableNotFound(table_id.to_string()))?;
        Ok(self.pipeline.process_batch(&mut self.ranges, &schema, schema_generation, mutations))
    }

    pub fn create_scanner(
        &mut self,
        table_id:  &str,
        row:       &[u8],
        spec:      &ScanSpec,
        now_nanos: i64,
    ) -> Result<ScannerId, TabletError> {
        Ok(self.scanners.create_scanner(&mut self.ranges, table_id, row, spec, now_nanos)?)
    }

    pub fn fetch_scanblock(
        &mut self,
        id:          ScannerId,
        now_nanos:   i64,
        byte_budget: u64,
    ) -> Result<ScanBlock, TabletError> {
        Ok(self.scanners.fetch_scanblock(&mut self.ranges, id, now_nanos, byte_budget)?)
    }

    pub fn destroy_scanner(&mut self, id: ScannerId) -> Result<(), TabletError> {
        Ok(self.scanners.destroy_scanner(&mut self.ranges, id)?)
    }

    /// Sweeps scanners past their TTL (§4.12); the caller is expected to drive this on its own
    /// timer tick, same as [`Self::flush_coalesced_commits`].
    pub fn sweep_scanners(&mut self, now_nanos: i64) -> usize {
        self.scanners.sweep_expired(&mut self.ranges, now_nanos)
    }

    /// Flushes every table's coalesced commit-log syncs (§4.8 "Group commit"); the caller's
    /// group-commit interval timer drives this.
    pub fn flush_coalesced_commits(&mut self) {
        self.pipeline.flush_coalesced_tables(&mut self.ranges);
    }

    /// Scores a fresh maintenance plan across every loaded range (§4.11).
    #[must_use]
    pub fn plan_maintenance(&self, memory_pressure: f64) -> Vec<Candidate> {
        self.maintenance.plan(&self.ranges, memory_pressure)
    }

    /// Runs one maintenance candidate and, for a range whose boundary or metalog entity changed
    /// as a result, re-persists its `RANGE` entity (§4.9 "collapsing by id", §4.11).
    pub fn execute_maintenance(
        &mut self,
        candidate:        &Candidate,
        transfer_log_dir: Option<PathBuf>,
        timestamp:        i64,
    ) -> Result<(), TabletError> {
        self.maintenance.execute(&mut self.ranges, candidate, transfer_log_dir)?;

        let old_id = self.range_entity_ids.get(&candidate.range_id).copied();
        if let Some(range) = self.ranges.get(&candidate.range_id) {
            let persisted_start = range.start_row().to_vec();
            let new_key: RangeId = (candidate.range_id.0.clone(), persisted_start);
            let id = old_id.unwrap_or_else(|| {
                let id = self.next_entity_id;
                self.next_entity_id += 1;
                id
            });
            self.metalog.put(EntityType::Range, id, timestamp, range.encode_entity_payload())?;
            if old_id.is_some() && new_key != candidate.range_id {
                self.range_entity_ids.remove(&candidate.range_id);
            }
            self.range_entity_ids.insert(new_key, id);
        } else if let Some(old_id) = old_id {
            // The range was handed off entirely (relinquish): its RANGE entity is removed.
            self.metalog.remove(EntityType::Range, old_id, timestamp)?;
            self.range_entity_ids.remove(&candidate.range_id);
        }
        Ok(())
    }

    #[must_use]
    pub fn loaded_range_count(&self) -> usize {
        self.ranges.len()
    }
}
