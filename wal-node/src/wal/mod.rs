//! Write-ahead log for a single storage-engine region.
//!
//! # File format
//!
//! A region's WAL is a sequence of files named
//! `_<version>-<startSearchIndex>-<suffix>.wal` (see [`file_layout`]).
//! `version` increases by one on every roll; `startSearchIndex` is the
//! smallest consensus search index any entry in the file carries, or the
//! sentinel [`wal_core::SearchIndex::NONE`] for a file that hasn't
//! received one yet.
//!
//! # Entry format
//!
//! Within a file, entries are length-prefixed, checksummed records (see
//! [`entry`]):
//!
//! ```text
//! len:u32 | type:u8 | search_index:u64 | body:(len - 13) bytes | crc32:u32
//! ```
//!
//! # Pieces
//!
//! - [`WalBuffer`] is the only thing that ever opens a WAL file for
//!   writing. A single background thread serializes every append,
//!   batching concurrent callers into shared fsyncs.
//! - [`CheckpointManager`] tracks which memtables are still live and how
//!   far back each one pins the log.
//! - [`SearchIterator`] and [`WalNode::get_req`]/[`WalNode::get_reqs`]
//!   replay the log by consensus search index, reconstructing logical
//!   write requests that may have been split across entries or files.
//! - The reclaimer (`WalNode::delete_outdated_files`,
//!   `WalNode::spawn_periodic_reclaim`) deletes files no longer needed
//!   for replay and, when the log's useful fraction drops too low,
//!   snapshots or flushes the oldest live memtable to shrink it.

mod buffer;
mod checkpoint;
mod entry;
mod file_layout;
mod metrics;
mod node;
mod reclaimer;
mod request;
mod reader;
mod search_iterator;

pub use buffer::{FlushListener, WalBuffer};
pub use checkpoint::CheckpointManager;
pub use entry::WalEntry;
pub use file_layout::{
    ascending_sort, binary_search_file_by_search_index, format_file_name, list_files,
    parse_file_name, FileLocation, WalFileEntry,
};
pub use metrics::{TimedOperation, WalMetrics};
pub use node::WalNode;
pub use reader::WalReader;
pub use reclaimer::ReclaimReport;
pub use request::{merge_insert_nodes, Request};
pub use search_iterator::SearchIterator;
