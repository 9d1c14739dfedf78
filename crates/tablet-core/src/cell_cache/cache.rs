//! `CellCache`: an ordered in-memory map from serialized key to value (§4.2).
//!
//! Backed by [`tablet_skiplist`]'s threadsafe skiplist, which stores flat byte entries under a
//! comparator rather than discrete key/value pairs; [`encode_entry`]/[`decode_entry`] pack a
//! `(key, value)` pair into one entry so the comparator can order entries by key alone.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use clone_behavior::{IndependentClone, MirroredClone, NearInstant, NonRecursive};
use seekable_iterator::{CursorIterator as _, Seekable as _};
use tablet_skiplist::{Comparator, Skiplist as _, threadsafe::ThreadsafeSkiplist};

use crate::serialize::{read_varint32, write_varint32};


/// Packs `key` and `value` into one skiplist entry: `varint(key.len()) ++ key ++ value`.
/// The value's length is implicit (whatever remains after the key), since entries are never
/// trimmed once written.
fn encode_entry(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "caller-bounded")]
    write_varint32(buf, key.len() as u32);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Splits a skiplist entry written by [`encode_entry`] back into `(key, value)`.
#[must_use]
pub fn decode_entry(entry: &[u8]) -> (&[u8], &[u8]) {
    #[expect(clippy::unwrap_used, reason = "only this module's own entries are ever stored")]
    let (key_len, rest) = read_varint32(entry).unwrap();
    #[expect(clippy::as_conversions, reason = "key_len was written from a usize")]
    rest.split_at(key_len as usize)
}

/// Orders skiplist entries by their embedded key alone, ignoring the value. Stateless, so
/// cloning is free (mirrors [`tablet_skiplist::DefaultComparator`]'s own pattern).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellKeyComparator;

impl Comparator for CellKeyComparator {
    fn cmp(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        decode_entry(lhs).0.cmp(decode_entry(rhs).0)
    }
}

impl NonRecursive for CellKeyComparator {}

impl IndependentClone<NearInstant> for CellKeyComparator {
    fn independent_clone(&self) -> Self {
        Self
    }
}

impl MirroredClone<NearInstant> for CellKeyComparator {
    fn mirrored_clone(&self) -> Self {
        Self
    }
}

/// Builds a bare probe entry (no value) used only to [`Seekable::seek`] to a key boundary;
/// never inserted.
#[must_use]
pub fn probe_entry(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 5);
    encode_entry(&mut buf, key, &[]);
    buf
}

/// One of the cell cache manager's three caches (§3, §4.2): an ordered map shared via
/// reference-counted cloning, with concurrent lock-free reads during insertion.
#[derive(Debug)]
pub struct CellCache {
    list:         ThreadsafeSkiplist<CellKeyComparator>,
    memory_used:  AtomicUsize,
    delete_count: AtomicUsize,
}

impl Default for CellCache {
    fn default() -> Self {
        Self {
            list:         ThreadsafeSkiplist::new(CellKeyComparator),
            memory_used:  AtomicUsize::new(0),
            delete_count: AtomicUsize::new(0),
        }
    }
}

impl CellCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a copy of `(key, value)`. `is_delete` only affects [`Self::delete_count`]
    /// accounting (§4.2).
    pub fn add(&mut self, key: &[u8], value: &[u8], is_delete: bool) {
        let mut entry = Vec::with_capacity(key.len() + value.len() + 5);
        encode_entry(&mut entry, key, value);
        let entry_len = entry.len();
        // A colliding key (identical row/family/qualifier/flag/timestamp/revision) is discarded
        // by the skiplist rather than folded; in practice the revision clock makes such
        // collisions vanishingly rare; see DESIGN.md for the tradeoff against true in-place fold.
        if self.list.insert_with(entry_len, |dst| dst.copy_from_slice(&entry)) {
            self.memory_used.fetch_add(entry_len, AtomicOrdering::Relaxed);
            if is_delete {
                self.delete_count.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory_used.load(AtomicOrdering::Relaxed) == 0
    }

    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.memory_used.load(AtomicOrdering::Relaxed)
    }

    /// Conservative estimate of bytes allocated by the backing arena; equal to
    /// [`Self::memory_used`] since this cache never frees individual entries.
    #[must_use]
    pub fn memory_allocated(&self) -> usize {
        self.memory_used()
    }

    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.delete_count.load(AtomicOrdering::Relaxed)
    }

    /// Hands out an independent reference-counted handle to the same underlying data.
    #[must_use]
    pub fn refcounted_clone(&self) -> Self {
        Self {
            list:         self.list.refcounted_clone(),
            memory_used:  AtomicUsize::new(self.memory_used.load(AtomicOrdering::Relaxed)),
            delete_count: AtomicUsize::new(self.delete_count.load(AtomicOrdering::Relaxed)),
        }
    }

    /// Iterates every `(key, value)` pair in ascending key order, starting at `start_key`
    /// (inclusive) when given, else from the beginning.
    pub fn scan_from(&self, start_key: Option<&[u8]>) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        let mut iter = self.list.iter();
        if let Some(start_key) = start_key {
            iter.seek(&probe_entry(start_key));
        } else {
            iter.seek_to_first();
        }
        CellCacheIter { iter }
    }

    /// A coarse histogram over row keys, used by split-point selection (§4.2). Returns up to
    /// `sample_limit` evenly-spaced distinct row keys observed while scanning the cache.
    #[must_use]
    pub fn split_row_estimate_data(&self, sample_limit: usize) -> Vec<Vec<u8>> {
        let sample_limit = sample_limit.max(1);
        let mut rows: Vec<&[u8]> = Vec::new();
        for (key, _value) in self.scan_from(None) {
            let row = decode_entry_row(key);
            if rows.last().copied() != Some(row) {
                rows.push(row);
            }
        }
        if rows.len() <= sample_limit {
            return rows.into_iter().map(<[u8]>::to_vec).collect();
        }
        let stride = rows.len() / sample_limit;
        rows.into_iter().step_by(stride.max(1)).map(<[u8]>::to_vec).collect()
    }

    /// Populates `out` with every distinct serialized key currently in the cache, for
    /// diagnostics (§4.2).
    pub fn populate_key_set(&self, out: &mut Vec<Vec<u8>>) {
        out.extend(self.scan_from(None).map(|(key, _)| key.to_vec()));
    }
}

fn decode_entry_row(key: &[u8]) -> &[u8] {
    let terminator = key.iter().position(|&b| b == 0).unwrap_or(key.len());
    #[expect(clippy::indexing_slicing, reason = "terminator <= key.len() by construction")]
    &key[..terminator]
}

struct CellCacheIter<'a> {
    iter: <ThreadsafeSkiplist<CellKeyComparator> as tablet_skiplist::Skiplist<CellKeyComparator>>::Iter<'a>,
}

impl<'a> Iterator for CellCacheIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.iter.current()?;
        self.iter.next();
        Some(decode_entry(entry))
    }
}
