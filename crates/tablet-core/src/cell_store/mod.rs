//! Immutable, sorted, on-disk cell stores (§4.3): an access group's cell cache is periodically
//! minor-compacted into one of these, and major compaction merges several into one.

mod block;
mod reader;
mod trailer;
mod writer;


pub use self::reader::CellStoreReader;
pub use self::trailer::{Trailer, TRAILER_SIZE};
pub use self::writer::CellStoreWriter;
