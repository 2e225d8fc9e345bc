//! Write-ahead log node: the durability layer a storage-engine region
//! appends insert and delete operations to before they're visible in a
//! memtable, replays them by consensus search index for consensus
//! catch-up, and reclaims once the storage engine has caught up.
//!
//! See [`wal`] for the module overview (file layout, entry format, and
//! how the pieces fit together) and [`WalNode`] for the entry point.

mod config;
mod wal;

pub use config::WalConfig;
pub use wal::{
    ascending_sort, binary_search_file_by_search_index, format_file_name, list_files,
    merge_insert_nodes, parse_file_name, CheckpointManager, FileLocation, FlushListener,
    ReclaimReport, Request, SearchIterator, TimedOperation, WalBuffer, WalEntry, WalFileEntry,
    WalMetrics, WalNode, WalReader,
};

pub use wal_core::{
    Cost, DeviceId, Error, FileVersion, FlushStatus, MemTableId, MemTableInfo, Payload, Result,
    SearchIndex, SignalKind, StorageEnginePort, SyncMode,
};
