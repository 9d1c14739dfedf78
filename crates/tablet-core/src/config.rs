//! Tunable configuration for the range server, gathered into one deserializable struct so
//! tests and an eventual CLI can construct a [`ServerContext`](crate::server::ServerContext)
//! without reaching into internals.

use serde::{Deserialize, Serialize};


/// Every tunable named in the specification body, with the defaults the source uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Commit log fragment roll size, in bytes (§4.7).
    pub commit_log_roll_size: u64,
    /// Target size of a cell-store data block before it is compressed and flushed (§4.3).
    pub cell_store_block_size: u64,
    /// False-positive rate used to size the per-cell-store Bloom filter (§4.3).
    pub bloom_filter_false_positive_rate: f64,
    /// Byte budget at which the commit stage fires an coalesced sync early (§4.8).
    pub update_coalesce_limit: u64,
    /// Per-table group-commit interval, in milliseconds (§4.8).
    pub group_commit_interval_ms: u64,
    /// Access-group size, in bytes, above which maintenance considers a range for split (§4.11).
    pub split_threshold: u64,
    /// Fraction of total RAM above which the maintenance scheduler enters low-memory mode (§5).
    pub low_memory_watermark: f64,
    /// Number of past metalog files kept after a roll (§4.9).
    pub metalog_history_size: u32,
    /// Interval on which the metalog's background `WriteScheduler` flushes (§4.9).
    pub metalog_flush_interval_ms: u64,
    /// Default time-to-live for an idle scanner in the scanner registry (§4.12).
    pub scanner_ttl_ms: u64,
    /// Byte budget per `fetch_scanblock` response (§4.12).
    pub scan_block_size: u64,
    /// Worker-pool size for the maintenance scheduler (§4.11).
    pub maintenance_worker_count: usize,
    /// Number of top-priority maintenance candidates submitted per scheduling pass (§4.11).
    pub maintenance_top_k: usize,
    /// Capacity of each pipeline stage's bounded queue (§4.8, §5).
    pub pipeline_queue_capacity: usize,
    /// Maximum tolerated clock skew, in revisions, before an update is rejected (§4.8).
    pub clock_skew_bound: i64,
    /// Direct-I/O alignment used by the file-system broker protocol (§6).
    pub direct_io_alignment: u32,
    /// Fixed sleep between retried DFS sync failures, in milliseconds (§7).
    pub dfs_retry_sleep_ms: u64,
    /// Maximum number of DFS sync retries before giving up (§7).
    pub dfs_retry_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_log_roll_size:             100 << 20,
            cell_store_block_size:             64 << 10,
            bloom_filter_false_positive_rate:  0.01,
            update_coalesce_limit:             8 << 20,
            group_commit_interval_ms:          10,
            split_threshold:                   200 << 20,
            low_memory_watermark:              0.80,
            metalog_history_size:              3,
            metalog_flush_interval_ms:         20,
            scanner_ttl_ms:                    2 * 60 * 1000,
            scan_block_size:                   1 << 20,
            maintenance_worker_count:          4,
            maintenance_top_k:                 8,
            pipeline_queue_capacity:           256,
            clock_skew_bound:                  0,
            direct_io_alignment:               512,
            dfs_retry_sleep_ms:                1_000,
            dfs_retry_count:                   3,
        }
    }
}
