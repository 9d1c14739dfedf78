//! `AccessGroup` (§4.2-§4.4, §4.7, §4.11): one physically stored column-family group within a
//! range -- its cell caches, its on-disk cell stores, and the commit log its updates are durable
//! against before they reach either.
//!
//! An access group is the unit minor and major compaction operate over: [`Self::flush`] writes a
//! frozen cell-cache snapshot out as a new cell store (minor compaction), and [`Self::compact`]
//! merges every existing store into one (major compaction), in both cases via the same
//! [`MergeScannerAccessGroup`] the read path uses, so compaction and scanning never disagree
//! about version/tombstone/counter semantics.

use std::path::PathBuf;

use tablet_vfs::traits::{ReadableFilesystem, WritableFile as _, WritableFilesystem};

use crate::cell_cache::CellCacheManager;
use crate::cell_store::{CellStoreReader, CellStoreWriter};
use crate::commit_log::{CommitLogReader, CommitLogWriter};
use crate::error::{CellStoreError, RangeError};
use crate::key::{parse_key, write_key, TimeOrder};
use crate::merge_scanner::{BufferedSource, MergeScannerAccessGroup};
use crate::range::decode_mutation_batch;
use crate::scan_context::{ScanContext, ScanSpec};
use crate::schema::TableInfo;


/// A finished cell store on disk, addressed by generation. Holds no filesystem handle of its own;
/// [`Self::open_reader`] is handed whichever `Fs` the owning [`AccessGroup`] is using, matching
/// the crate-wide pattern of readers and writers borrowing a filesystem rather than owning one
/// each (§4.3).
#[derive(Debug, Clone)]
pub struct CellStoreHandle {
    pub path:       PathBuf,
    pub generation: u64,
    pub size:       u64,
}

impl CellStoreHandle {
    #[must_use]
    pub fn new(path: PathBuf, generation: u64, size: u64) -> Self {
        Self { path, generation, size }
    }

    /// Opens this store for scanning, against `fs`.
    pub fn open_reader<Fs: ReadableFilesystem>(
        &self,
        fs: &Fs,
    ) -> Result<CellStoreReader<Fs::RandomAccessFile>, CellStoreError> {
        let file = fs.open_random_access(&self.path).map_err(|err| CellStoreError::Io(err.to_string()))?;
        CellStoreReader::open(file, self.size)
    }
}

/// Accounting one access group surfaces to the maintenance scheduler (§4.11).
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceData {
    pub cache_bytes: usize,
    pub store_count: usize,
    pub store_bytes: u64,
}

/// One access group of a loaded range: its cell caches, its finished cell stores, and the commit
/// log its write-cache insertions are durable against (§4.2-§4.4, §4.7).
///
/// Generic over `Fs: Clone` (Design Notes, "shared filesystem handle"): the commit log writer and
/// every cell-store read each need independent access to the same underlying filesystem, so the
/// owning [`crate::range::Range`] hands every access group its own cheap clone (e.g.
/// [`tablet_vfs::SharedFs`]) rather than this type borrowing one centrally-owned `Fs`.
pub struct AccessGroup<Fs: WritableFilesystem> {
    name:              String,
    column_family_ids: Vec<u8>,
    in_memory:         bool,
    schema:            TableInfo,

    fs:                    Fs,
    dir:                   PathBuf,
    cell_store_block_size: u64,
    bloom_false_positive_rate: f64,

    manager:         CellCacheManager,
    stores:          Vec<CellStoreHandle>,
    commit_log:      CommitLogWriter<Fs>,
    next_generation: u64,
}

impl<Fs: WritableFilesystem + Clone> AccessGroup<Fs> {
    /// Opens (or creates) the access group named `ag_name` in `schema`, rooted at `dir`: a
    /// `stores/` subdirectory for finished cell stores and a `log/` subdirectory for its commit
    /// log (§4.7).
    pub fn open(
        mut fs:    Fs,
        dir:       PathBuf,
        schema:    TableInfo,
        ag_name:   &str,
        roll_size: u64,
        cell_store_block_size: u64,
        bloom_false_positive_rate: f64,
    ) -> Result<Self, RangeError> {
        let ag_schema = schema.access_group(ag_name)
            .ok_or(RangeError::RangeNotFound)?;

        let stores_dir = dir.join("stores");
        fs.create_dir_all(&stores_dir)
            .map_err(|err| crate::error::CommitLogError::Io(err.to_string()))?;

        let stores = Self::discover_stores(&fs, &stores_dir)?;
        let next_generation = stores.iter().map(|store| store.generation).max().map_or(0, |max| max + 1);

        // Recovery (§4.10 "Load", §8 Testable Property 7): rebuild the in-memory cache from
        // whatever this access group's own commit log already holds, *before* wrapping it in a
        // writer -- anything durable here but not yet flushed into a cell store must still be
        // visible to the first scan after a restart. A brand-new access group's log directory is
        // empty, so this is a no-op on the fresh-range path.
        let mut manager = CellCacheManager::new();
        let mut reader = CommitLogReader::new(fs.clone(), dir.join("log"));
        for block in reader.replay()? {
            for (key, value) in decode_mutation_batch(&block.payload)? {
                let is_delete = parse_key(&key).is_ok_and(|parsed| parsed.flag.is_delete());
                manager.add(&key, &value, is_delete);
            }
        }

        let commit_log = CommitLogWriter::open(fs.clone(), dir.join("log"), roll_size)?;

        Ok(Self {
            name: ag_schema.name.clone(),
            column_family_ids: ag_schema.column_family_ids.clone(),
            in_memory: ag_schema.in_memory,
            schema,
            fs,
            dir,
            cell_store_block_size,
            bloom_false_positive_rate,
            manager,
            stores,
            commit_log,
            next_generation,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column_family_ids(&self) -> &[u8] {
        &self.column_family_ids
    }

    #[must_use]
    pub fn in_memory(&self) -> bool {
        self.in_memory
    }

    /// Inserts into the write cache (§4.2). Callers apply an update here only after it has
    /// already been durably committed to `commit_log` (§4.8, "Apply" follows "Commit").
    pub fn add(&mut self, key: &[u8], value: &[u8], is_delete: bool) {
        self.manager.add(key, value, is_delete);
    }

    pub fn commit_log_mut(&mut self) -> &mut CommitLogWriter<Fs> {
        &mut self.commit_log
    }

    /// Applies one block replayed from a transfer log or this access group's own commit log
    /// directly into its caches, bypassing `commit_log` (the block is already durable) (§4.6
    /// `replay_transfer_log`, §4.10 "Load").
    pub fn apply_replayed_cell(&mut self, key: &[u8], value: &[u8]) {
        let is_delete = parse_key(key).is_ok_and(|parsed| parsed.flag.is_delete());
        self.manager.add(key, value, is_delete);
    }

    /// Builds this access group's merge-scanner source for one `create_scanner` call (§4.6): a
    /// consistent snapshot of the caches, plus every on-disk store, each drained up front into a
    /// [`BufferedSource`] (Design Notes, "Polymorphism over 'any scanner'").
    pub fn create_scanner(
        &self,
        ctx:       ScanContext,
        now_nanos: i64,
    ) -> Result<MergeScannerAccessGroup, CellStoreError> {
        let snapshot = self.manager.snapshot();
        let mut sources = Vec::with_capacity(3 + self.stores.len());

        let write_items: Vec<_> =
            snapshot.write.scan_from(None).map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        sources.push(BufferedSource::new(write_items, 0));

        let read_items: Vec<_> =
            snapshot.read.scan_from(None).map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        sources.push(BufferedSource::new(read_items, 0));

        if let Some(immutable) = &snapshot.immutable {
            let immutable_items: Vec<_> =
                immutable.scan_from(None).map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
            sources.push(BufferedSource::new(immutable_items, 0));
        }

        for store in &self.stores {
            let reader = store.open_reader(&self.fs)?;
            let items: Vec<(Vec<u8>, Vec<u8>)> = reader.scan_from(None)?.collect();
            #[expect(clippy::as_conversions, reason = "one store's total bytes stay well under u64::MAX")]
            let disk_bytes = items.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
            sources.push(BufferedSource::new(items, disk_bytes));
        }

        Ok(MergeScannerAccessGroup::new(sources, ctx, now_nanos))
    }

    /// Freezes the cell caches (§3 invariant, §4.2): read+write become one immutable snapshot and
    /// fresh empty caches take over live updates. The maintenance scheduler is expected to follow
    /// this with [`Self::flush`] once in-flight updates against the old write cache have drained.
    pub fn freeze(&mut self) {
        self.manager.freeze();
    }

    /// Writes the frozen immutable cache (if any and non-empty) out as a new cell store (minor
    /// compaction, §4.11), then discards it from memory: its contents now live durably in the
    /// store, so [`CellCacheManager::discard_immutable`] is used instead of
    /// [`CellCacheManager::merge_caches`]. Returns `Ok(None)` if there was nothing to flush.
    pub fn flush(&mut self) -> Result<Option<CellStoreHandle>, CellStoreError> {
        let Some(immutable) = self.manager.immutable_cache() else { return Ok(None) };
        if immutable.is_empty() {
            self.manager.discard_immutable();
            return Ok(None);
        }

        let mut writer = self.new_store_writer()?;
        for (key, value) in immutable.scan_from(None) {
            let row = parse_key(key).map_or(key, |parsed| parsed.row);
            writer.0.add(key, value, row)?;
        }
        let size = writer.0.finish()?;

        self.manager.discard_immutable();
        let handle = CellStoreHandle::new(writer.1, writer.2, size);
        self.stores.push(handle.clone());
        Ok(Some(handle))
    }

    /// Major compaction (§4.11): merges every cell store into one fresh store via the same
    /// version/tombstone/counter reconciliation the read path uses, with
    /// [`ScanSpec::return_deletes`] set so live tombstones survive into the merged store rather
    /// than being silently dropped (§4.4). A no-op if there are fewer than two stores.
    pub fn compact(&mut self) -> Result<Option<CellStoreHandle>, CellStoreError> {
        if self.stores.len() < 2 {
            return Ok(None);
        }

        let mut sources = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            let reader = store.open_reader(&self.fs)?;
            let items: Vec<(Vec<u8>, Vec<u8>)> = reader.scan_from(None)?.collect();
            sources.push(BufferedSource::new(items, 0));
        }

        let spec = ScanSpec { revision_snapshot: i64::MAX, return_deletes: true, ..Default::default() };
        let ctx = ScanContext::compile(&spec, &self.schema)
            .map_err(|err| CellStoreError::Io(err.to_string()))?;
        let mut scanner = MergeScannerAccessGroup::new(sources, ctx, i64::MAX);

        let mut writer = self.new_store_writer()?;
        while let Some((row, cells)) = scanner.next() {
            for cell in cells {
                let time_order = self.schema.column_family(cell.column_family_id)
                    .map_or(TimeOrder::Descending, |cf| cf.time_order);
                let mut key = Vec::new();
                write_key(
                    &mut key, &row, cell.column_family_id, &cell.qualifier, cell.flag,
                    cell.timestamp, cell.revision, time_order,
                ).map_err(CellStoreError::from)?;
                writer.0.add(&key, &cell.value, &row)?;
            }
        }
        let size = writer.0.finish()?;

        for store in self.stores.drain(..) {
            let _ = self.fs.delete(&store.path);
        }
        let handle = CellStoreHandle::new(writer.1, writer.2, size);
        self.stores.push(handle.clone());
        Ok(Some(handle))
    }

    /// A coarse row-key histogram over every cache currently held (§4.2, §4.11), used by the
    /// maintenance scheduler to pick a split point. On-disk stores are not sampled: by the time a
    /// range is large enough to split, its caches alone are a representative enough sample, and
    /// walking the stores too would make split candidate evaluation proportional to range size.
    #[must_use]
    pub fn split_row_estimate_data(&self, sample_limit: usize) -> Vec<Vec<u8>> {
        let snapshot = self.manager.snapshot();
        let mut rows = snapshot.read.split_row_estimate_data(sample_limit);
        rows.extend(snapshot.write.split_row_estimate_data(sample_limit));
        if let Some(immutable) = &snapshot.immutable {
            rows.extend(immutable.split_row_estimate_data(sample_limit));
        }
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// Diagnostic and scheduling accounting for this access group (§4.11).
    #[must_use]
    pub fn maintenance_data(&self) -> MaintenanceData {
        MaintenanceData {
            cache_bytes: self.manager.memory_used(),
            store_count: self.stores.len(),
            store_bytes: self.stores.iter().map(|store| store.size).sum(),
        }
    }

    /// Rediscovers the finished cell stores left in `stores_dir` by a prior run (§4.3, §4.10
    /// "Load"): lists the directory, keeps only the 10-digit generation-numbered entries, and
    /// opens each just far enough to size it, treating one whose trailer doesn't validate as not
    /// present rather than failing the whole access group (§4.3 "Partial files ... are detected
    /// on open and treated as not-present" -- a writer that crashed mid-`finish` leaves exactly
    /// this kind of file behind). Returned in ascending generation order, matching the order
    /// `stores` is always kept in elsewhere (oldest first).
    fn discover_stores(fs: &Fs, stores_dir: &std::path::Path) -> Result<Vec<CellStoreHandle>, RangeError> {
        use tablet_vfs::traits::IntoDirectoryIterator as _;

        let mut generations = Vec::new();
        for entry in fs.children(stores_dir)
            .map_err(|err| crate::error::CommitLogError::Io(err.to_string()))?
            .dir_iter()
        {
            let entry = entry.map_err(|err| crate::error::CommitLogError::Io(err.to_string()))?;
            if let Some(name) = entry.to_str() {
                if name.len() == 10 && name.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(generation) = name.parse::<u64>() {
                        generations.push(generation);
                    }
                }
            }
        }
        generations.sort_unstable();

        let mut stores = Vec::with_capacity(generations.len());
        for generation in generations {
            let path = stores_dir.join(format!("{generation:010}"));
            let size = match fs.size_of(&path) {
                Ok(size) => size,
                Err(_) => continue,
            };
            let Ok(file) = fs.open_random_access(&path) else { continue };
            if CellStoreReader::open(file, size).is_err() {
                // No valid trailer: a writer that crashed before `finish` wrote one. Not present.
                continue;
            }
            stores.push(CellStoreHandle::new(path, generation, size));
        }
        Ok(stores)
    }

    fn new_store_writer(&mut self) -> Result<(CellStoreWriter<Fs::WriteFile>, PathBuf, u64), CellStoreError> {
        let generation = self.next_generation;
        self.next_generation += 1;
        let path = self.dir.join("stores").join(format!("{generation:010}"));
        let file = self.fs.open_writable(&path, true).map_err(|err| CellStoreError::Io(err.to_string()))?;
        let block_size = usize::try_from(self.cell_store_block_size).unwrap_or(usize::MAX);
        let writer = CellStoreWriter::new(file, generation, block_size, self.bloom_false_positive_rate);
        Ok((writer, path, generation))
    }
}
