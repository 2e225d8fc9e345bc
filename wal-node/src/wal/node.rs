//! The façade a storage engine actually talks to: append insert/delete
//! entries, register and retire memtables, and look up reconstructed
//! requests by consensus search index. Everything else in this crate
//! (`WalBuffer`, `CheckpointManager`, `SearchIterator`, the reclaimer) is
//! private machinery `WalNode` wires together.

use crate::config::WalConfig;
use crate::wal::buffer::{FlushListener, WalBuffer};
use crate::wal::checkpoint::CheckpointManager;
use crate::wal::entry::WalEntry;
use crate::wal::metrics::WalMetrics;
use crate::wal::request::Request;
use crate::wal::search_iterator::SearchIterator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wal_core::{
    Cost, DeviceId, FileVersion, MemTableId, MemTableInfo, Payload, Result, SearchIndex,
    StorageEnginePort,
};

/// One WAL instance, scoped to a single region/partition of the
/// storage engine it backs.
pub struct WalNode {
    pub(crate) dir: PathBuf,
    pub(crate) buffer: WalBuffer,
    pub(crate) checkpoint: CheckpointManager,
    pub(crate) engine: Arc<dyn StorageEnginePort>,
    pub(crate) config: WalConfig,

    pub(crate) memtable_snapshot_count: Mutex<HashMap<MemTableId, u32>>,
    pub(crate) flushed_cost_by_file_version: Mutex<HashMap<FileVersion, Cost>>,
    pub(crate) total_flushed_cost: AtomicU64,
    /// Monotonic watermark below which search indices are known never to
    /// be replayed again. Default `0` is a sentinel meaning "not yet set
    /// by anything downstream" — see the reclaimer's first check.
    pub(crate) safely_deleted_search_index: AtomicU64,
}

impl WalNode {
    /// Open (or create) a WAL node rooted at `dir`, backed by `engine`
    /// for flush coordination.
    pub fn open(
        dir: impl Into<PathBuf>,
        config: WalConfig,
        engine: Arc<dyn StorageEnginePort>,
    ) -> Result<Self> {
        let dir = dir.into();
        let buffer = WalBuffer::open(&dir, config.clone())?;
        Ok(Self {
            dir,
            buffer,
            checkpoint: CheckpointManager::new(),
            engine,
            config,
            memtable_snapshot_count: Mutex::new(HashMap::new()),
            flushed_cost_by_file_version: Mutex::new(HashMap::new()),
            total_flushed_cost: AtomicU64::new(0),
            safely_deleted_search_index: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metrics(&self) -> &WalMetrics {
        self.buffer.metrics()
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    pub fn close(&self) -> Result<()> {
        self.buffer.close()
    }

    pub fn safely_deleted_search_index(&self) -> SearchIndex {
        SearchIndex(self.safely_deleted_search_index.load(Ordering::Acquire))
    }

    /// Raise the safely-deleted watermark. Monotonic: lower values are
    /// ignored.
    pub fn set_safely_deleted_search_index(&self, idx: SearchIndex) {
        let mut current = self.safely_deleted_search_index.load(Ordering::Acquire);
        while idx.0 > current {
            match self.safely_deleted_search_index.compare_exchange_weak(
                current,
                idx.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn log_insert_row(
        &self,
        memtable_id: MemTableId,
        search_index: SearchIndex,
        device_id: DeviceId,
        payload: Payload,
    ) -> Result<FlushListener> {
        self.checkpoint.add_cost(memtable_id, Cost(payload.len() as u64));
        self.buffer.write(WalEntry::InsertRow {
            memtable_id,
            search_index,
            device_id,
            payload,
        })
    }

    pub fn log_insert_tablet(
        &self,
        memtable_id: MemTableId,
        search_index: SearchIndex,
        device_id: DeviceId,
        start: u32,
        end: u32,
        payload: Payload,
    ) -> Result<FlushListener> {
        self.checkpoint.add_cost(memtable_id, Cost(payload.len() as u64));
        self.buffer.write(WalEntry::InsertTablet {
            memtable_id,
            search_index,
            device_id,
            start,
            end,
            payload,
        })
    }

    pub fn log_delete(
        &self,
        memtable_id: MemTableId,
        search_index: SearchIndex,
        payload: Payload,
    ) -> Result<FlushListener> {
        self.checkpoint.add_cost(memtable_id, Cost(payload.len() as u64));
        self.buffer.write(WalEntry::Delete {
            memtable_id,
            search_index,
            payload,
        })
    }

    pub(crate) fn log_memtable_snapshot(
        &self,
        memtable_id: MemTableId,
        payload: Payload,
    ) -> Result<FlushListener> {
        self.buffer.write(WalEntry::MemTableSnapshot { memtable_id, payload })
    }

    /// Register a newly-created memtable as live, pinned at the buffer's
    /// current file version. Starts at `Cost(0)`; each subsequent
    /// `log_insert_row`/`log_insert_tablet`/`log_delete` call for this id
    /// accrues cost by its payload size.
    pub fn on_memtable_created(&self, memtable_id: MemTableId, target_tsfile_path: PathBuf) {
        self.checkpoint.register_memtable(MemTableInfo {
            memtable_id,
            target_tsfile_path,
            first_file_version_id: self.buffer.current_version(),
            cost: Cost(0),
        });
    }

    /// Mark a memtable as durably flushed to the storage engine, folding
    /// its cost into the flushed-cost ledger for its current file
    /// version.
    pub fn on_memtable_flushed(&self, memtable_id: MemTableId) {
        let Some(info) = self.checkpoint.flush_memtable(memtable_id) else {
            return; // already flushed, or never registered
        };
        self.memtable_snapshot_count.lock().remove(&memtable_id);
        let version = info.first_file_version_id;
        let mut ledger = self.flushed_cost_by_file_version.lock();
        *ledger.entry(version).or_insert(Cost(0)) += info.cost;
        self.total_flushed_cost.fetch_add(info.cost.0, Ordering::Relaxed);
    }

    /// Look up the reconstructed request for a single search index, if
    /// it's ready without blocking.
    pub fn get_req(&self, idx: SearchIndex) -> Option<Request> {
        let mut it = self.get_req_iterator(idx);
        if it.has_next() {
            it.next()
        } else {
            None
        }
    }

    /// Fetch up to `count` consecutive requests starting at `start`,
    /// stopping early if the log doesn't yet have that many ready.
    pub fn get_reqs(&self, start: SearchIndex, count: usize) -> Vec<Request> {
        let mut it = self.get_req_iterator(start);
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            if !it.has_next() {
                break;
            }
            match it.next() {
                Some(req) => out.push(req),
                None => break,
            }
        }
        out
    }

    /// A cursor over the log starting at `start`, for streaming replay.
    pub fn get_req_iterator(&self, start: SearchIndex) -> SearchIterator {
        SearchIterator::new(self.dir.clone(), self.buffer.clone(), start)
    }
}
