//! Bloom filter block for cell stores (§4.3): the one-shot filter built over every key in a
//! finished store, consulted before a point lookup bothers reading a data block.

mod bloom;


pub use self::bloom::BloomPolicy;


use std::fmt::Debug;


pub trait FilterPolicy: Debug {
    fn name(&self) -> &'static str;

    fn create_filter(&self, keys: &[u8], key_offsets: &[usize]) -> Vec<u8>;

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}
