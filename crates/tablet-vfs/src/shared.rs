//! A cheaply cloneable, lock-guarded handle over any [`WritableFilesystem`], standing in for a
//! production DFS client's thin broker connection.
//!
//! [`MemoryFSWithInner`](crate::memory_fs::MemoryFSWithInner) and [`StandardFS`](crate::StandardFS)
//! both hold their catalog (or OS handle) directly and are not [`Clone`]; many collaborators in
//! one loaded range -- an access group's commit log writer, its cell store handles, the range's
//! metalog writer -- need to address the same filesystem independently and concurrently.
//! [`SharedFs`] wraps any filesystem in an `Arc<Mutex<_>>` and implements the filesystem traits by
//! locking for the duration of each call, giving every collaborator its own cheap `Clone` handle.

use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::MutexPoisoned;
use crate::fs_traits::{ReadableFilesystem, WritableFilesystem};
use crate::util_traits::{FSError, FSLockError, IntoDirectoryIterator};


/// Wraps `Fs`'s own error type so a poisoned mutex is reported alongside it rather than panicking.
#[derive(Debug)]
pub enum SharedFsError<E> {
    Poisoned,
    Inner(E),
}

impl<E: Display> Display for SharedFsError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Poisoned   => write!(f, "a mutex guarding a shared filesystem handle was poisoned"),
            Self::Inner(err) => write!(f, "{err}"),
        }
    }
}

impl<E: StdError + 'static> StdError for SharedFsError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Poisoned   => None,
            Self::Inner(err) => Some(err),
        }
    }
}

impl<E> From<MutexPoisoned> for SharedFsError<E> {
    fn from(_err: MutexPoisoned) -> Self {
        Self::Poisoned
    }
}

impl<E: FSError> FSError for SharedFsError<E> {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::Inner(err) if err.is_not_found())
    }

    fn is_interrupted(&self) -> bool {
        matches!(self, Self::Inner(err) if err.is_interrupted())
    }

    fn is_poison_error(&self) -> bool {
        matches!(self, Self::Poisoned) || matches!(self, Self::Inner(err) if err.is_poison_error())
    }
}

impl<E: FSLockError> FSLockError for SharedFsError<E> {
    fn is_already_locked(&self) -> bool {
        matches!(self, Self::Inner(err) if err.is_already_locked())
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::Inner(err) if FSLockError::is_not_found(err))
    }

    fn is_interrupted(&self) -> bool {
        matches!(self, Self::Inner(err) if FSLockError::is_interrupted(err))
    }

    fn is_poison_error(&self) -> bool {
        matches!(self, Self::Poisoned) || matches!(self, Self::Inner(err) if FSLockError::is_poison_error(err))
    }
}

/// Owned, pre-collected iterator over a directory's children. [`SharedFs::children`] drains the
/// inner filesystem's own (borrowing) iterator while it still holds the lock, since the borrow
/// cannot outlive the brief `MutexGuard` the call takes.
pub struct SharedDirIter<E> {
    items: std::vec::IntoIter<Result<PathBuf, E>>,
}

impl<E: StdError> IntoDirectoryIterator for SharedDirIter<E> {
    type DirIterError = E;

    fn dir_iter(self) -> impl Iterator<Item = Result<PathBuf, Self::DirIterError>> {
        self.items
    }
}

/// A cheap, `Clone` handle to a shared `Fs`, guarded by a mutex.
///
/// Every method locks for just the duration of the inner call; the files and lockfiles handed
/// back (e.g. [`ReadableFilesystem::RandomAccessFile`]) are independently owned, not borrowed from
/// the guard, matching how [`memory_fs`](crate::memory_fs) and [`std_fs`](crate::std_fs) already
/// hand out self-contained file handles.
#[derive(Debug)]
pub struct SharedFs<Fs>(Arc<Mutex<Fs>>);

impl<Fs> SharedFs<Fs> {
    #[must_use]
    pub fn new(fs: Fs) -> Self {
        Self(Arc::new(Mutex::new(fs)))
    }
}

impl<Fs> Clone for SharedFs<Fs> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<Fs: ReadableFilesystem> ReadableFilesystem for SharedFs<Fs> {
    type ReadFile = Fs::ReadFile;
    type RandomAccessFile = Fs::RandomAccessFile;
    type Error = SharedFsError<Fs::Error>;
    type IntoDirectoryIter<'a>
        = SharedDirIter<Fs::Error>
    where
        Self: 'a;
    type Lockfile = Fs::Lockfile;
    type LockError = SharedFsError<Fs::LockError>;

    fn open_sequential(&self, path: &Path) -> Result<Self::ReadFile, Self::Error> {
        let fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.open_sequential(path).map_err(SharedFsError::Inner)
    }

    fn open_random_access(&self, path: &Path) -> Result<Self::RandomAccessFile, Self::Error> {
        let fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.open_random_access(path).map_err(SharedFsError::Inner)
    }

    fn exists(&self, path: &Path) -> Result<bool, Self::Error> {
        let fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.exists(path).map_err(SharedFsError::Inner)
    }

    fn children(&self, path: &Path) -> Result<Self::IntoDirectoryIter<'_>, Self::Error> {
        let fs = self.0.lock().map_err(MutexPoisoned::from)?;
        let items: Vec<_> = fs.children(path).map_err(SharedFsError::Inner)?.dir_iter().collect();
        Ok(SharedDirIter { items: items.into_iter() })
    }

    fn size_of(&self, path: &Path) -> Result<u64, Self::Error> {
        let fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.size_of(path).map_err(SharedFsError::Inner)
    }

    fn open_and_lock(&mut self, path: &Path) -> Result<Self::Lockfile, Self::LockError> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.open_and_lock(path).map_err(SharedFsError::Inner)
    }

    fn unlock_and_close(&mut self, lockfile: Self::Lockfile) -> Result<(), Self::LockError> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.unlock_and_close(lockfile).map_err(SharedFsError::Inner)
    }
}

impl<Fs: WritableFilesystem> WritableFilesystem for SharedFs<Fs> {
    type WriteFile = Fs::WriteFile;
    type AppendFile = Fs::AppendFile;

    fn open_writable(&mut self, path: &Path, create_dir: bool) -> Result<Self::WriteFile, Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.open_writable(path, create_dir).map_err(SharedFsError::Inner)
    }

    fn open_appendable(&mut self, path: &Path, create_dir: bool) -> Result<Self::AppendFile, Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.open_appendable(path, create_dir).map_err(SharedFsError::Inner)
    }

    fn delete(&mut self, path: &Path) -> Result<(), Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.delete(path).map_err(SharedFsError::Inner)
    }

    fn create_dir(&mut self, path: &Path) -> Result<(), Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.create_dir(path).map_err(SharedFsError::Inner)
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<(), Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.create_dir_all(path).map_err(SharedFsError::Inner)
    }

    fn remove_dir(&mut self, path: &Path) -> Result<(), Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.remove_dir(path).map_err(SharedFsError::Inner)
    }

    fn rename(&mut self, old: &Path, new: &Path) -> Result<(), Self::Error> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.rename(old, new).map_err(SharedFsError::Inner)
    }

    fn create_and_lock(
        &mut self,
        path:       &Path,
        create_dir: bool,
    ) -> Result<Self::Lockfile, Self::LockError> {
        let mut fs = self.0.lock().map_err(MutexPoisoned::from)?;
        fs.create_and_lock(path, create_dir).map_err(SharedFsError::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreadLocalMemoryFS;
    use std::path::Path as StdPath;

    #[test]
    fn clones_share_the_same_underlying_filesystem() {
        let mut shared = SharedFs::new(ThreadLocalMemoryFS::new());
        let mut other = shared.clone();

        other.open_writable(StdPath::new("/a"), true).unwrap();
        assert!(shared.exists(StdPath::new("/a")).unwrap());
    }
}
