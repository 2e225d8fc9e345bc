//! Tunable knobs for the WAL node.
//!
//! This is a plain, `serde`-serializable struct with no file or CLI
//! loader attached — wiring it up to a config file or flag parser is a
//! concern of the embedding process, out of scope here (spec.md §1).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use wal_core::{Cost, SyncMode};

/// Configuration for a single WAL node / region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Reclaimer threshold: below this effective-information ratio, the
    /// reclaimer snapshots or flushes the oldest live memtable.
    pub wal_min_effective_info_ratio: f64,

    /// Snapshot cap per memtable before the reclaimer forces a flush
    /// instead of another snapshot.
    pub max_wal_memtable_snapshot_num: u32,

    /// Cost above which the reclaimer prefers flushing over snapshotting.
    pub wal_memtable_snapshot_threshold: Cost,

    /// When true, `Cost` is interpreted as memtable RAM bytes; when
    /// false, as an abstract count.
    pub enable_mem_control: bool,

    /// File size above which the buffer rolls to a new file.
    pub file_roll_size: u64,

    /// Maximum entries batched into one fsync'd write.
    pub batch_size_entries: usize,

    /// Maximum encoded bytes batched into one fsync'd write.
    pub batch_size_bytes: usize,

    /// How long the serializer waits for more entries before flushing
    /// whatever has accumulated.
    pub fsync_interval: Duration,

    /// Durability level used for every batch flush.
    pub sync_mode: SyncMode,

    /// How often the reclaimer polls flush status while waiting for a
    /// flush it triggered.
    pub flush_poll_interval: Duration,

    /// Bound on how long the reclaimer waits for a triggered flush
    /// before giving up for this tick (non-fatal, retried next tick).
    pub flush_poll_timeout: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_min_effective_info_ratio: 0.1,
            max_wal_memtable_snapshot_num: 3,
            wal_memtable_snapshot_threshold: Cost(64 * 1024 * 1024),
            enable_mem_control: true,
            file_roll_size: 64 * 1024 * 1024,
            batch_size_entries: 256,
            batch_size_bytes: 2 * 1024 * 1024,
            fsync_interval: Duration::from_millis(10),
            sync_mode: SyncMode::Normal,
            flush_poll_interval: Duration::from_secs(1),
            flush_poll_timeout: Duration::from_secs(10),
        }
    }
}
