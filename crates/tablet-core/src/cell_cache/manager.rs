//! `CellCacheManager`: owns one access group's read, write, and optional immutable caches, and
//! their freeze/merge lifecycle (§3, §4.2).

use super::cache::CellCache;


/// The three caches an access group's scans observe as one consistent snapshot (§3).
///
/// Design Notes ("cyclic object graphs"): the source shares one arena between `read_cache` and
/// `write_cache` so promotion is a pointer merge rather than a copy. Each [`CellCache`] here owns
/// its entries independently instead; `merge_caches` materializes a fresh sorted cache by
/// k-way-merging the existing ones. This trades the unsafe arena-sharing trick for a plain
/// reference-counted value type, at the cost of one extra copy per merge -- an explicit,
/// intentional simplification (see DESIGN.md).
#[derive(Debug, Default)]
pub struct CellCacheManager {
    read_cache:      CellCache,
    write_cache:     CellCache,
    immutable_cache: Option<CellCache>,
}

impl CellCacheManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts into the write cache; the only cache a live update may mutate (§4.2).
    pub fn add(&mut self, key: &[u8], value: &[u8], is_delete: bool) {
        self.write_cache.add(key, value, is_delete);
    }

    #[must_use]
    pub fn read_cache(&self) -> &CellCache {
        &self.read_cache
    }

    #[must_use]
    pub fn write_cache(&self) -> &CellCache {
        &self.write_cache
    }

    #[must_use]
    pub fn immutable_cache(&self) -> Option<&CellCache> {
        self.immutable_cache.as_ref()
    }

    /// Snapshots `read_cache ∪ write_cache` as the immutable cache and installs fresh empty
    /// caches (§3 invariant). If an immutable cache from a prior, not-yet-merged freeze already
    /// exists, it is folded into the new snapshot first so no data is lost.
    pub fn freeze(&mut self) {
        let mut snapshot = CellCache::new();
        for (key, value) in self.immutable_cache.iter().flat_map(CellCache::scan_from_start) {
            snapshot.add(key, value, false);
        }
        for (key, value) in self.read_cache.scan_from(None) {
            snapshot.add(key, value, false);
        }
        for (key, value) in self.write_cache.scan_from(None) {
            snapshot.add(key, value, false);
        }
        self.immutable_cache = Some(snapshot);
        self.read_cache  = CellCache::new();
        self.write_cache = CellCache::new();
    }

    /// Folds `write_cache` into `read_cache`, then, if a frozen `immutable_cache` is present,
    /// materializes a single unified sorted stream into a fresh `read_cache` and drops the
    /// immutable one.
    ///
    /// Design Notes treats "`merge_caches` drops the immutable cache when the read cache is
    /// empty" as an invariant rather than a coincidence; this implementation always performs the
    /// merge-and-drop whenever an immutable cache is present, which subsumes that case.
    pub fn merge_caches(&mut self) {
        if self.write_cache.is_empty() && self.immutable_cache.is_none() {
            return;
        }

        let mut merged = CellCache::new();
        for (key, value) in self.read_cache.scan_from(None) {
            merged.add(key, value, false);
        }
        for (key, value) in self.write_cache.scan_from(None) {
            merged.add(key, value, false);
        }
        if let Some(immutable) = self.immutable_cache.take() {
            for (key, value) in immutable.scan_from(None) {
                merged.add(key, value, false);
            }
        }
        self.read_cache  = merged;
        self.write_cache = CellCache::new();
    }

    /// Drops the frozen immutable cache without folding it back into `read_cache`, for the minor
    /// compaction path (§4.2, §4.11): once a flush has durably written the immutable cache's
    /// contents to a new cell store, the store itself becomes the source of truth for that data
    /// and re-merging it into memory would only waste space. Returns the discarded cache (for a
    /// caller that wants to keep scanning it, e.g. a flush in flight) or `None` if none was frozen.
    pub fn discard_immutable(&mut self) -> Option<CellCache> {
        self.immutable_cache.take()
    }

    /// Bytes used across all non-empty caches, for maintenance scheduling (§4.11).
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.read_cache.memory_used()
            + self.write_cache.memory_used()
            + self.immutable_cache.as_ref().map_or(0, CellCache::memory_used)
    }

    /// Acquires a consistent snapshot of whichever caches are non-empty, for scanner creation
    /// (§3 invariant, §4.6). The caller is expected to hold the access group's lock while
    /// calling this, so the resulting handles observe one instant in time.
    #[must_use]
    pub fn snapshot(&self) -> CellCacheSnapshot {
        CellCacheSnapshot {
            read:      self.read_cache.refcounted_clone(),
            write:     self.write_cache.refcounted_clone(),
            immutable: self.immutable_cache.as_ref().map(CellCache::refcounted_clone),
        }
    }
}

/// A consistent triple of cache handles acquired under the access group's lock, from which
/// scanner construction proceeds lock-free (§3, §5).
#[derive(Debug)]
pub struct CellCacheSnapshot {
    pub read:      CellCache,
    pub write:     CellCache,
    pub immutable: Option<CellCache>,
}

impl CellCache {
    fn scan_from_start(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.scan_from(None)
    }
}
