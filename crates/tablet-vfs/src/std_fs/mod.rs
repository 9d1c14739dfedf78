//! A [`ReadableFilesystem`]/[`WritableFilesystem`] implementation backed directly by the host
//! operating system's filesystem, for use outside of tests (and, in principle, by a real
//! DFS-backed deployment that mounts the distributed filesystem at a local path).

mod std_fs_core;

#[cfg(unix)]
mod std_fs_unix;
#[cfg(windows)]
mod std_fs_windows;

pub use self::std_fs_core::IntoDirectoryIter;

use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::Error as IoError;
use std::path::Path;

use fs4::fs_std::FileExt;

use self::std_fs_core::{readable_core, writable_core};
use crate::error::MutexPoisoned;
use crate::fs_traits::{ReadableFilesystem, WritableFilesystem};
use crate::util_traits::FSLockError;


/// An open, OS-locked file, held for as long as this range server (or other tablet-engine
/// process) claims ownership of the directory it lives in.
#[derive(Debug)]
pub struct Lockfile(File);

#[derive(Debug)]
#[non_exhaustive]
pub enum LockError {
    AlreadyLocked,
    Io(IoError),
}

impl From<IoError> for LockError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl From<MutexPoisoned> for LockError {
    fn from(err: MutexPoisoned) -> Self {
        Self::Io(err.into())
    }
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AlreadyLocked => write!(f, "lockfile was already held by another process"),
            Self::Io(err)       => write!(f, "i/o error while locking file: {err}"),
        }
    }
}

impl StdError for LockError {}

impl FSLockError for LockError {
    fn is_already_locked(&self) -> bool {
        matches!(self, Self::AlreadyLocked)
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }

    fn is_interrupted(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::Interrupted)
    }

    fn is_poison_error(&self) -> bool {
        false
    }
}

/// A filesystem interface that reads and writes through directly to the host OS, for use outside
/// of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFS;

impl ReadableFilesystem for StandardFS {
    readable_core!();

    type Lockfile = Lockfile;
    type LockError = LockError;

    fn open_and_lock(&mut self, path: &Path) -> Result<Self::Lockfile, Self::LockError> {
        let file = File::options().read(true).write(true).create(true).truncate(false).open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Lockfile(file)),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::AlreadyLocked),
            Err(err) => Err(err.into()),
        }
    }

    fn unlock_and_close(&mut self, lockfile: Self::Lockfile) -> Result<(), Self::LockError> {
        FileExt::unlock(&lockfile.0)?;
        Ok(())
    }
}

impl WritableFilesystem for StandardFS {
    writable_core!();

    fn create_and_lock(
        &mut self,
        path:       &Path,
        create_dir: bool,
    ) -> Result<Self::Lockfile, Self::LockError> {
        if create_dir {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.open_and_lock(path)
    }
}
