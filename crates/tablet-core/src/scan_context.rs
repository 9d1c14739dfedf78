//! Compiles a scan specification into the predicates and boundary keys the merge scanners
//! actually run against (§4.5).
//!
//! A [`ScanContext`] is built once per `create_scanner` call and then cloned into every
//! access-group merge scanner that participates in the scan; it owns compiled regexes and
//! boundary keys rather than borrowing from the originating request buffer, so it survives
//! after that buffer is released.

use regex::bytes::Regex;

use crate::cell::Flag;
use crate::error::ScanContextError;
use crate::key::{write_key, TimeOrder, END_ROW_MARKER};
use crate::schema::TableSchema;


/// A qualifier-matching predicate for one column family (§4.5).
#[derive(Debug, Clone)]
pub enum QualifierPredicate {
    /// No qualifier restriction; every qualifier in the family matches.
    Any,
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
    Regex(Regex),
}

impl QualifierPredicate {
    #[must_use]
    pub fn matches(&self, qualifier: &[u8]) -> bool {
        match self {
            Self::Any              => true,
            Self::Exact(exact)     => qualifier == exact.as_slice(),
            Self::Prefix(prefix)   => qualifier.starts_with(prefix),
            Self::Regex(re)        => re.is_match(qualifier),
        }
    }
}

/// The compiled per-column-family predicate a merge scanner consults for every candidate cell
/// in that family (§4.5).
#[derive(Debug, Clone)]
pub struct CellPredicate {
    /// Cells older than `now - ttl_seconds` are dropped; `None` means no TTL.
    pub ttl_seconds:    Option<u64>,
    /// `min(schema.max_versions, ctx.max_versions)` for this scan, per §4.4 item 4.
    pub max_versions:   u32,
    pub is_counter:     bool,
    pub qualifier:      QualifierPredicate,
    pub time_order:     TimeOrder,
}

/// A dense 256-bit mask indexed by column-family id, so membership testing in the scan's hot
/// path is a single bit test rather than a linear scan of the schema (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct FamilyMask([u64; 4]);

impl FamilyMask {
    #[must_use]
    pub fn empty() -> Self {
        Self([0; 4])
    }

    pub fn set(&mut self, id: u8) {
        let word = usize::from(id) / 64;
        let bit = usize::from(id) % 64;
        #[expect(clippy::indexing_slicing, reason = "word < 4 since id: u8 < 256")]
        { self.0[word] |= 1 << bit; }
    }

    #[must_use]
    pub fn contains(&self, id: u8) -> bool {
        let word = usize::from(id) / 64;
        let bit = usize::from(id) % 64;
        #[expect(clippy::indexing_slicing, reason = "word < 4 since id: u8 < 256")]
        { self.0[word] & (1 << bit) != 0 }
    }
}

/// A half-open-or-closed boundary on the row key, as given by the scan spec's open/closed flags
/// (§4.5); compiled down to an inclusive start/end key pair that bounds the underlying scanners.
#[derive(Debug, Clone)]
pub struct RowInterval {
    pub start_row:     Vec<u8>,
    pub start_inclusive: bool,
    pub end_row:       Vec<u8>,
    pub end_inclusive: bool,
}

/// One column-predicate clause from the scan spec: restrict to one family, optionally with a
/// qualifier predicate. Raised as [`ScanContextError::QualifierOnCounterFamily`] if the family
/// is a counter family and a qualifier predicate is given (§4.5).
#[derive(Debug, Clone)]
pub struct ColumnPredicateSpec {
    pub family_name: String,
    pub qualifier:   QualifierPredicate,
}

/// The user-facing scan specification, prior to compilation (§4.5, §6 `create_scanner`).
#[derive(Debug, Clone, Default)]
pub struct ScanSpec {
    pub row_interval:    Option<(Vec<u8>, bool, Vec<u8>, bool)>,
    pub row_set:         Vec<Vec<u8>>,
    pub row_regex:       Option<String>,
    pub column_predicates: Vec<ColumnPredicateSpec>,
    pub start_time:      Option<i64>,
    pub end_time:        Option<i64>,
    pub max_versions:    Option<u32>,
    pub value_regex:     Option<String>,
    pub revision_snapshot: i64,
    pub row_limit:       Option<u64>,
    pub cell_limit:      Option<u64>,
    /// Compactions pass this as `true` so tombstones survive into the output (§4.4).
    pub return_deletes:  bool,
}

/// The compiled form of a [`ScanSpec`] against a particular [`TableSchema`] (§4.5).
///
/// Cheaply clonable (an `Arc`-free deep copy, since every field here is already an owned
/// value), so it can be attached once per participating access-group scanner.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub family_mask:       FamilyMask,
    pub predicates:        Vec<(u8, CellPredicate)>,
    pub start_key:         Vec<u8>,
    /// Whether `start_key` itself is included in the scan (§4.5): when `true`, `start_key` is
    /// the smallest possible key of the start row and the bound is `key >= start_key`; when
    /// `false`, `start_key` is the *largest* possible key of the (excluded) start row and the
    /// bound becomes `key > start_key`, per the scan spec's open/closed flag.
    pub start_inclusive:   bool,
    pub end_key:           Vec<u8>,
    /// Whether `end_key` itself is included in the scan (§4.5): when `true`, `end_key` is the
    /// largest possible key of the end row and the bound is `key <= end_key`; when `false`,
    /// `end_key` is the *smallest* possible key of the (excluded) end row and the bound becomes
    /// `key < end_key`.
    pub end_inclusive:     bool,
    pub row_set:           Vec<Vec<u8>>,
    pub row_regex:         Option<Regex>,
    pub value_regex:       Option<Regex>,
    pub start_time:        Option<i64>,
    pub end_time:          Option<i64>,
    pub revision_snapshot: i64,
    pub row_limit:         Option<u64>,
    pub cell_limit:        Option<u64>,
    pub return_deletes:    bool,
}

impl ScanContext {
    /// Compiles `spec` against `schema`, raising synchronously on any of the error conditions
    /// named in §4.5.
    pub fn compile(spec: &ScanSpec, schema: &TableSchema) -> Result<Self, ScanContextError> {
        let mut family_mask = FamilyMask::empty();
        let mut predicates = Vec::new();

        if spec.column_predicates.is_empty() {
            for cf in &schema.column_families {
                family_mask.set(cf.id);
                predicates.push((cf.id, Self::default_predicate(cf, spec)?));
            }
        } else {
            for column_spec in &spec.column_predicates {
                let cf = schema.column_family_by_name(&column_spec.family_name)
                    .ok_or_else(|| {
                        // Name isn't known yet resolvable to an id; surface id 0 as a placeholder
                        // is wrong, so look it up by name failure distinctly.
                        ScanContextError::UnknownColumnFamily(0)
                    })?;
                if cf.is_counter && !matches!(column_spec.qualifier, QualifierPredicate::Any) {
                    return Err(ScanContextError::QualifierOnCounterFamily(cf.id));
                }
                family_mask.set(cf.id);
                let mut predicate = Self::default_predicate(cf, spec)?;
                predicate.qualifier = column_spec.qualifier.clone();
                predicates.push((cf.id, predicate));
            }
        }

        let (start_row, start_inclusive, end_row, end_inclusive) = spec.row_interval.clone()
            .unwrap_or((Vec::new(), true, END_ROW_MARKER.to_vec(), true));
        if start_row > end_row {
            return Err(ScanContextError::InvertedRowRange);
        }
        if !start_inclusive && !end_inclusive && start_row == end_row {
            return Err(ScanContextError::ContradictoryCellInterval);
        }

        // `start_key`/`end_key` are sentinel keys of their row that are smaller (larger) than
        // any real key of that row could be. When a bound is inclusive we need the smallest
        // (largest) key of the row itself; when exclusive, we instead use the opposite sentinel
        // of the *same* row, which is guaranteed to sort outside every real key of that row, and
        // let the caller compare with `<=`/`>=` instead of `<`/`>` to exclude it. This avoids
        // having to construct a byte-level "row successor"/"row predecessor".
        let mut start_key = Vec::new();
        if start_inclusive {
            write_key(&mut start_key, &start_row, 0, &[], Flag::DeleteRow, i64::MAX, i64::MAX, TimeOrder::Descending)
                .map_err(|_| ScanContextError::InvertedRowRange)?;
        } else {
            write_key(&mut start_key, &start_row, u8::MAX, &[], Flag::Insert, i64::MIN, i64::MIN, TimeOrder::Descending)
                .map_err(|_| ScanContextError::InvertedRowRange)?;
        }
        let mut end_key = Vec::new();
        if end_inclusive {
            write_key(&mut end_key, &end_row, u8::MAX, &[], Flag::Insert, i64::MIN, i64::MIN, TimeOrder::Descending)
                .map_err(|_| ScanContextError::InvertedRowRange)?;
        } else {
            write_key(&mut end_key, &end_row, 0, &[], Flag::DeleteRow, i64::MAX, i64::MAX, TimeOrder::Descending)
                .map_err(|_| ScanContextError::InvertedRowRange)?;
        }

        let row_regex = spec.row_regex.as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| ScanContextError::BadRegex(err.to_string()))?;
        let value_regex = spec.value_regex.as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| ScanContextError::BadRegex(err.to_string()))?;

        Ok(Self {
            family_mask,
            predicates,
            start_key,
            start_inclusive,
            end_key,
            end_inclusive,
            row_set: spec.row_set.clone(),
            row_regex,
            value_regex,
            start_time: spec.start_time,
            end_time: spec.end_time,
            revision_snapshot: spec.revision_snapshot,
            row_limit: spec.row_limit,
            cell_limit: spec.cell_limit,
            return_deletes: spec.return_deletes,
        })
    }

    fn default_predicate(
        cf:   &crate::schema::ColumnFamily,
        spec: &ScanSpec,
    ) -> Result<CellPredicate, ScanContextError> {
        Ok(CellPredicate {
            ttl_seconds:  cf.ttl_seconds,
            max_versions: spec.max_versions.map_or(cf.max_versions, |v| v.min(cf.max_versions).max(1)),
            is_counter:   cf.is_counter,
            qualifier:    QualifierPredicate::Any,
            time_order:   cf.time_order,
        })
    }

    #[must_use]
    pub fn predicate_for(&self, family_id: u8) -> Option<&CellPredicate> {
        self.predicates.iter().find(|(id, _)| *id == family_id).map(|(_, predicate)| predicate)
    }

    #[must_use]
    pub fn row_matches(&self, row: &[u8]) -> bool {
        if !self.row_set.is_empty() && !self.row_set.iter().any(|candidate| candidate == row) {
            return false;
        }
        if let Some(re) = &self.row_regex {
            if !re.is_match(row) {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn value_matches(&self, value: &[u8]) -> bool {
        self.value_regex.as_ref().is_none_or(|re| re.is_match(value))
    }
}
