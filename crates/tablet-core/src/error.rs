//! Error types for the tablet engine, and the mapping onto the flat wire [`ErrorCode`] space.

use std::{error::Error as StdError, result::Result as StdResult, sync::PoisonError};
use std::fmt::{Display, Formatter, Result as FmtResult};

use thiserror::Error;


pub type Result<T> = StdResult<T, TabletError>;

/// The flat integer error space exposed on the wire surface (§6).
///
/// This is what a client-facing response carries; it is produced from a [`TabletError`]
/// via [`TabletError::error_code`], not constructed directly by most internal code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    Ok,
    TableNotFound,
    TableDropped,
    RangeNotFound,
    RangeAlreadyLoaded,
    GenerationMismatch,
    BadKey,
    OutOfRange,
    RevisionOrderError,
    ClockSkew,
    BadScanSpec,
    ScannerNotFound,
    ChecksumMismatch,
    EntryTruncated,
    MissingRecoverEntity,
    ServerShuttingDown,
    RequestTimeout,
}

/// Errors from the serialization and key-model layer (§4.1).
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("varint overran the end of the buffer")]
    VarintTruncated,
    #[error("length-prefixed field declared length {declared} but only {available} bytes remained")]
    FieldTruncated { declared: usize, available: usize },
    #[error("key is missing its trailing timestamp/revision fields")]
    KeyTooShort,
    #[error("unknown cell flag byte {0:#x}")]
    UnknownFlag(u8),
    #[error("row key exceeds the maximum length")]
    RowTooLong,
    #[error("start_row > end_row in a range boundary")]
    InvertedBoundary,
    #[error("row or qualifier bytes contain an embedded NUL, which the key encoding reserves as a terminator")]
    EmbeddedNulByte,
}

/// Errors from the commit log and transfer-log machinery (§4.7).
#[derive(Debug, Error)]
pub enum CommitLogError {
    #[error("i/o error accessing commit log: {0}")]
    Io(String),
    #[error("commit log block checksum mismatch in fragment {fragment}")]
    ChecksumMismatch { fragment: u64 },
    #[error("commit log block declares a revision range that is not monotonic with prior blocks")]
    RevisionOrderError,
    #[error("compression codec {0} is not supported by this build")]
    UnsupportedCodec(u8),
    #[error("fragment file is unreadable (corrupt header)")]
    CorruptFragmentHeader,
}

/// Errors from the cell-store reader/writer (§4.3).
#[derive(Debug, Error)]
pub enum CellStoreError {
    #[error("i/o error accessing cell store: {0}")]
    Io(String),
    #[error("cell store trailer checksum mismatch")]
    TrailerChecksumMismatch,
    #[error("cell store file has no valid trailer (partial/unfinished file)")]
    NotPresent,
    #[error("cell store index block is corrupt")]
    CorruptIndex,
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Errors from the metalog writer/reader (§4.9).
#[derive(Debug, Error)]
pub enum MetaLogError {
    #[error("i/o error accessing metalog: {0}")]
    Io(String),
    #[error("metalog entity header checksum mismatch for id {id}")]
    ChecksumMismatch { id: i64 },
    #[error("metalog file name/version does not match this definition")]
    WrongDefinition,
    #[error("metalog replay found no EntityRecover sentinel: writer crashed mid-write")]
    MissingRecoverEntity,
}

/// Errors raised while compiling a scan specification (§4.5).
#[derive(Debug, Error)]
pub enum ScanContextError {
    #[error("unknown column family id {0}")]
    UnknownColumnFamily(u8),
    #[error("column qualifier predicate given for counter column family {0}")]
    QualifierOnCounterFamily(u8),
    #[error("contradictory cell interval in scan specification")]
    ContradictoryCellInterval,
    #[error("start_row > end_row in scan specification")]
    InvertedRowRange,
    #[error("failed to compile regular expression: {0}")]
    BadRegex(String),
}

/// Errors from range-level operations (§4.6).
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("schema generation mismatch: expected {expected}, got {actual}")]
    GenerationMismatch { expected: u32, actual: u32 },
    #[error("range boundaries have shrunk; requested range is no longer served here")]
    RangeNotFound,
    #[error("update rejected: assigned revision {assigned} < range latest_revision {latest}")]
    ClockSkew { assigned: i64, latest: i64 },
    #[error("server is shutting down")]
    ServerShuttingDown,
    #[error("transfer log block was truncated mid-read")]
    RequestTruncated,
    #[error("column family {0} is not declared by this range's schema")]
    UnknownColumnFamily(u8),
    #[error("illegal range state transition from {from} to {to}")]
    IllegalStateTransition { from: &'static str, to: &'static str },
    #[error("metalog payload for a range entity is corrupt or truncated")]
    CorruptEntity,
    #[error(transparent)]
    CommitLog(#[from] CommitLogError),
    #[error(transparent)]
    CellStore(#[from] CellStoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    MetaLog(#[from] MetaLogError),
    #[error(transparent)]
    ScanContext(#[from] ScanContextError),
}

/// Errors produced by the three update-pipeline stages (§4.8).
#[derive(Debug, Error)]
pub enum UpdatePipelineError {
    #[error("row {0:?} is not covered by any live range")]
    OutOfRange(Vec<u8>),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    CommitLog(#[from] CommitLogError),
}

/// Errors raised by the scanner registry (§4.12).
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner id {0} is unknown or has expired")]
    NotFound(u64),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    ScanContext(#[from] ScanContextError),
}

/// Top-level error type, covering every fallible surface of the engine.
#[derive(Debug, Error)]
pub enum TabletError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    CommitLog(#[from] CommitLogError),
    #[error(transparent)]
    CellStore(#[from] CellStoreError),
    #[error(transparent)]
    MetaLog(#[from] MetaLogError),
    #[error(transparent)]
    ScanContext(#[from] ScanContextError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    UpdatePipeline(#[from] UpdatePipelineError),
    #[error(transparent)]
    Scanner(#[from] ScannerError),
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("table {0} has been dropped")]
    TableDropped(String),
    #[error("range {0} is already loaded")]
    RangeAlreadyLoaded(String),
    #[error("request timed out before it could be serviced")]
    RequestTimeout,
}

impl TabletError {
    /// Maps an internal error onto the flat wire error-code space (§6, §7).
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::TableNotFound(_)                                   => ErrorCode::TableNotFound,
            Self::TableDropped(_)                                    => ErrorCode::TableDropped,
            Self::RangeAlreadyLoaded(_)                              => ErrorCode::RangeAlreadyLoaded,
            Self::RequestTimeout                                     => ErrorCode::RequestTimeout,
            Self::Key(KeyError::InvertedBoundary)                    => ErrorCode::BadKey,
            Self::Key(_)                                             => ErrorCode::BadKey,
            Self::CommitLog(CommitLogError::ChecksumMismatch { .. }) => ErrorCode::ChecksumMismatch,
            Self::CommitLog(CommitLogError::RevisionOrderError)      => ErrorCode::RevisionOrderError,
            Self::CommitLog(_)                                       => ErrorCode::EntryTruncated,
            Self::CellStore(CellStoreError::TrailerChecksumMismatch) => ErrorCode::ChecksumMismatch,
            Self::CellStore(_)                                       => ErrorCode::EntryTruncated,
            Self::MetaLog(MetaLogError::MissingRecoverEntity)        => ErrorCode::MissingRecoverEntity,
            Self::MetaLog(MetaLogError::ChecksumMismatch { .. })     => ErrorCode::ChecksumMismatch,
            Self::MetaLog(_)                                         => ErrorCode::EntryTruncated,
            Self::ScanContext(_)                                     => ErrorCode::BadScanSpec,
            Self::Range(RangeError::GenerationMismatch { .. })       => ErrorCode::GenerationMismatch,
            Self::Range(RangeError::RangeNotFound)                   => ErrorCode::RangeNotFound,
            Self::Range(RangeError::ClockSkew { .. })                => ErrorCode::ClockSkew,
            Self::Range(RangeError::ServerShuttingDown)              => ErrorCode::ServerShuttingDown,
            Self::Range(RangeError::RequestTruncated)                => ErrorCode::EntryTruncated,
            Self::Range(RangeError::UnknownColumnFamily(_))          => ErrorCode::BadKey,
            Self::Range(RangeError::IllegalStateTransition { .. })   => ErrorCode::RangeNotFound,
            Self::Range(RangeError::CorruptEntity)                   => ErrorCode::EntryTruncated,
            Self::Range(RangeError::CommitLog(CommitLogError::RevisionOrderError)) => ErrorCode::RevisionOrderError,
            Self::Range(RangeError::CommitLog(_))                    => ErrorCode::EntryTruncated,
            Self::Range(RangeError::CellStore(_))                    => ErrorCode::EntryTruncated,
            Self::Range(RangeError::Key(_))                          => ErrorCode::BadKey,
            Self::Range(RangeError::MetaLog(MetaLogError::MissingRecoverEntity)) => ErrorCode::MissingRecoverEntity,
            Self::Range(RangeError::MetaLog(MetaLogError::ChecksumMismatch { .. })) => ErrorCode::ChecksumMismatch,
            Self::Range(RangeError::MetaLog(_))                      => ErrorCode::EntryTruncated,
            Self::Range(RangeError::ScanContext(_))                  => ErrorCode::BadScanSpec,
            Self::UpdatePipeline(UpdatePipelineError::OutOfRange(_)) => ErrorCode::OutOfRange,
            Self::UpdatePipeline(UpdatePipelineError::CommitLog(CommitLogError::RevisionOrderError)) => ErrorCode::RevisionOrderError,
            Self::UpdatePipeline(UpdatePipelineError::Range(RangeError::CommitLog(CommitLogError::RevisionOrderError))) => ErrorCode::RevisionOrderError,
            Self::UpdatePipeline(_)                                  => ErrorCode::EntryTruncated,
            Self::Scanner(ScannerError::NotFound(_))                 => ErrorCode::ScannerNotFound,
            Self::Scanner(ScannerError::Range(_))                    => ErrorCode::RangeNotFound,
            Self::Scanner(ScannerError::ScanContext(_))              => ErrorCode::BadScanSpec,
        }
    }

    /// Corruption-class failures abort the server rather than risk serving lost updates (§7).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::ChecksumMismatch | ErrorCode::MissingRecoverEntity,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MutexPoisoned;

impl Display for MutexPoisoned {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "a mutex guarding range-server state was poisoned")
    }
}

impl StdError for MutexPoisoned {}

impl<T> From<PoisonError<T>> for MutexPoisoned {
    #[inline]
    fn from(_err: PoisonError<T>) -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_order_error_maps_losslessly_at_every_nesting_depth() {
        let direct: TabletError = CommitLogError::RevisionOrderError.into();
        assert_eq!(direct.error_code(), ErrorCode::RevisionOrderError);

        let via_range: TabletError =
            RangeError::CommitLog(CommitLogError::RevisionOrderError).into();
        assert_eq!(via_range.error_code(), ErrorCode::RevisionOrderError);

        let via_update_pipeline: TabletError =
            UpdatePipelineError::CommitLog(CommitLogError::RevisionOrderError).into();
        assert_eq!(via_update_pipeline.error_code(), ErrorCode::RevisionOrderError);

        let via_update_pipeline_range: TabletError =
            UpdatePipelineError::Range(RangeError::CommitLog(CommitLogError::RevisionOrderError)).into();
        assert_eq!(via_update_pipeline_range.error_code(), ErrorCode::RevisionOrderError);
    }

    #[test]
    fn other_commit_log_errors_still_fall_back_to_entry_truncated() {
        let err: TabletError = CommitLogError::CorruptFragmentHeader.into();
        assert_eq!(err.error_code(), ErrorCode::EntryTruncated);
    }
}
