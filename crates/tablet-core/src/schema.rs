//! The table schema: column-family declarations referenced by access groups, scan contexts,
//! and the merge scanner (§3, §4.5). Schema authoring tooling is explicitly out of scope (§1);
//! this module only models the data a loaded range needs to interpret its own cells.

use crate::key::TimeOrder;


/// Declared properties of one column family (§3 GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamily {
    pub id:           u8,
    pub name:         String,
    /// Access group this family is physically stored in.
    pub access_group: String,
    /// Time-to-live, in seconds; `None` means cells never expire by age.
    pub ttl_seconds:  Option<u64>,
    /// Default `max_versions`, overridable per scan by [`crate::scan_context`].
    pub max_versions: u32,
    /// Whether this family's cells are counter cells, folded on read (§3).
    pub is_counter:   bool,
    /// Ascending or descending ordering of timestamp/revision within a (row, qualifier) (§3).
    pub time_order:   TimeOrder,
}

impl Default for ColumnFamily {
    fn default() -> Self {
        Self {
            id:           0,
            name:         String::new(),
            access_group: String::new(),
            ttl_seconds:  None,
            max_versions: 1,
            is_counter:   false,
            time_order:   TimeOrder::Descending,
        }
    }
}

/// One access group's declared membership: the set of column-family ids stored together (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGroupSchema {
    pub name:              String,
    pub column_family_ids: Vec<u8>,
    /// In-memory flag: keep this access group's cell cache resident even under memory pressure.
    pub in_memory:         bool,
}

/// Which of the four recovery-order log classes a table's updates durably land in (§4.8
/// "Commit", §4.10 "Load"). The root, metadata, and system logs are synced on every commit since
/// losing one of their updates would make unrelated ranges unreachable; the user log is allowed
/// to coalesce sync points across a group-commit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogClass {
    Root,
    Metadata,
    System,
    #[default]
    User,
}

impl LogClass {
    /// Whether the commit stage must `sync` this table's access groups after every batch rather
    /// than coalescing (§4.8).
    #[must_use]
    pub fn syncs_every_commit(self) -> bool {
        !matches!(self, Self::User)
    }

    /// Recovery order (§4.10 "Load"): root, then metadata, then system, then user, since each
    /// earlier group's ranges carry the location metadata needed to find the next group's.
    #[must_use]
    pub fn recovery_order(self) -> u8 {
        match self {
            Self::Root => 0,
            Self::Metadata => 1,
            Self::System => 2,
            Self::User => 3,
        }
    }
}

/// A table's full schema: its generation (for stale-client detection, GLOSSARY) and the
/// column families / access groups that partition it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_id:       String,
    pub generation:      u32,
    pub column_families: Vec<ColumnFamily>,
    pub access_groups:   Vec<AccessGroupSchema>,
    /// Which durability/recovery class this table's logs belong to (§4.8, §4.10).
    pub log_class:       LogClass,
}

impl TableSchema {
    #[must_use]
    pub fn column_family(&self, id: u8) -> Option<&ColumnFamily> {
        self.column_families.iter().find(|cf| cf.id == id)
    }

    #[must_use]
    pub fn column_family_by_name(&self, name: &str) -> Option<&ColumnFamily> {
        self.column_families.iter().find(|cf| cf.name == name)
    }

    #[must_use]
    pub fn access_group(&self, name: &str) -> Option<&AccessGroupSchema> {
        self.access_groups.iter().find(|ag| ag.name == name)
    }

    /// A 256-bit-indexable mask is impractical to store densely for the common case of a
    /// handful of families; `family_mask` (`scan_context`) builds the dense form on demand.
    #[must_use]
    pub fn column_family_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.column_families.iter().map(|cf| cf.id)
    }
}

/// Shared, reference-counted handle to a table's schema, mirroring the source's `TableInfo`
/// (Design Notes: represented as a plain `Arc` rather than an intrusive reference count, since
/// genuine sharing -- many ranges of one table -- is the only reason for the indirection).
pub type TableInfo = std::sync::Arc<TableSchema>;
