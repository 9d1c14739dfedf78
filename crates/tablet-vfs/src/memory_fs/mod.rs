mod aliases;
mod fs;

mod error;
mod file;
mod file_inner;
mod iter;
mod lockfile;
mod path;


pub use self::{
    error::Error,
    file::MemoryFileWithInner,
    file_inner::MemoryFileInner,
    fs::MemoryFSWithInner,
    iter::IntoDirectoryIter,
};
pub use self::aliases::{
    GetInnerFile, MemoryFSErr, MemoryFSFile, MemoryFSResult,
    ThreadLocalMemoryFS, ThreadLocalMemoryFSErr, ThreadLocalMemoryFile,
    ThreadsafeMemoryFS, ThreadsafeMemoryFSErr, ThreadsafeMemoryFile,
};
pub use self::lockfile::{LockError, Lockfile};
