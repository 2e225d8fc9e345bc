//! Tracks which memtables are still "live" — still represented in the
//! WAL rather than fully flushed to the storage engine — and how far
//! back each one pins the log via `first_file_version_id`.
//!
//! This is the liveness bookkeeping the reclaimer reads to decide which
//! files can be deleted and which memtable is the oldest reclaim
//! candidate; it does not itself touch any file on disk.

use parking_lot::RwLock;
use std::collections::HashMap;
use wal_core::{Cost, Error, FileVersion, MemTableId, MemTableInfo, Result};

#[derive(Default)]
struct Inner {
    /// Insertion order, oldest first. `oldest_memtable` is `order[0]`.
    order: Vec<MemTableId>,
    live: HashMap<MemTableId, MemTableInfo>,
}

pub struct CheckpointManager {
    inner: RwLock<Inner>,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a newly-created memtable as live. Re-registering an
    /// already-live id replaces its info but keeps its original
    /// position in insertion order.
    pub fn register_memtable(&self, info: MemTableInfo) {
        let mut inner = self.inner.write();
        if !inner.live.contains_key(&info.memtable_id) {
            inner.order.push(info.memtable_id);
        }
        inner.live.insert(info.memtable_id, info);
    }

    /// Remove a memtable from the live set. Idempotent: flushing an
    /// already-flushed (or never-registered) id is a no-op.
    pub fn flush_memtable(&self, id: MemTableId) -> Option<MemTableInfo> {
        let mut inner = self.inner.write();
        let removed = inner.live.remove(&id);
        if removed.is_some() {
            inner.order.retain(|&x| x != id);
        }
        removed
    }

    /// Bump a live memtable's accrued cost by `delta` — called as each
    /// entry is logged for it, so `total_active_cost` reflects how much
    /// un-flushed data the memtable represents. A no-op for an id that
    /// isn't (or is no longer) live.
    pub fn add_cost(&self, id: MemTableId, delta: Cost) {
        let mut inner = self.inner.write();
        if let Some(info) = inner.live.get_mut(&id) {
            info.cost += delta;
        }
    }

    /// Advance `first_file_version_id` for a live memtable. Monotonic:
    /// rejects any attempt to move it backwards.
    pub fn set_first_file_version(&self, id: MemTableId, new_version: FileVersion) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(info) = inner.live.get_mut(&id) else {
            return Err(Error::InvalidState(format!(
                "{id} is not a live memtable"
            )));
        };
        if new_version.0 < info.first_file_version_id.0 {
            return Err(Error::InvalidState(format!(
                "first_file_version_id for {id} would move backwards ({} -> {})",
                info.first_file_version_id, new_version
            )));
        }
        info.first_file_version_id = new_version;
        Ok(())
    }

    /// The live memtable registered longest ago, if any.
    pub fn oldest_memtable(&self) -> Option<MemTableInfo> {
        let inner = self.inner.read();
        let id = *inner.order.first()?;
        inner.live.get(&id).cloned()
    }

    /// The smallest `first_file_version_id` across all live memtables —
    /// no WAL file before this version can ever be needed for replay.
    /// `None` when there are no live memtables (treat as "infinity": no
    /// version-based floor on deletion).
    pub fn first_valid_wal_version(&self) -> Option<FileVersion> {
        let inner = self.inner.read();
        inner
            .live
            .values()
            .map(|info| info.first_file_version_id)
            .min()
    }

    /// Sum of `cost` across every live memtable.
    pub fn total_active_cost(&self) -> Cost {
        let inner = self.inner.read();
        inner.live.values().map(|info| info.cost).sum()
    }

    pub fn live_count(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_live(&self, id: MemTableId) -> bool {
        self.inner.read().live.contains_key(&id)
    }

    pub fn info(&self, id: MemTableId) -> Option<MemTableInfo> {
        self.inner.read().live.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(id: u64, version: u64, cost: u64) -> MemTableInfo {
        MemTableInfo {
            memtable_id: MemTableId(id),
            target_tsfile_path: PathBuf::from(format!("tsfile-{id}")),
            first_file_version_id: FileVersion(version),
            cost: Cost(cost),
        }
    }

    #[test]
    fn oldest_is_insertion_order() {
        let cm = CheckpointManager::new();
        cm.register_memtable(info(1, 0, 10));
        cm.register_memtable(info(2, 0, 10));
        assert_eq!(cm.oldest_memtable().unwrap().memtable_id, MemTableId(1));
        cm.flush_memtable(MemTableId(1));
        assert_eq!(cm.oldest_memtable().unwrap().memtable_id, MemTableId(2));
    }

    #[test]
    fn flush_is_idempotent() {
        let cm = CheckpointManager::new();
        cm.register_memtable(info(1, 0, 10));
        assert!(cm.flush_memtable(MemTableId(1)).is_some());
        assert!(cm.flush_memtable(MemTableId(1)).is_none());
    }

    #[test]
    fn first_file_version_rejects_decrease() {
        let cm = CheckpointManager::new();
        cm.register_memtable(info(1, 5, 10));
        cm.set_first_file_version(MemTableId(1), FileVersion(7)).unwrap();
        assert!(cm.set_first_file_version(MemTableId(1), FileVersion(6)).is_err());
        assert_eq!(
            cm.info(MemTableId(1)).unwrap().first_file_version_id,
            FileVersion(7)
        );
    }

    #[test]
    fn first_valid_wal_version_is_minimum_and_none_when_empty() {
        let cm = CheckpointManager::new();
        assert_eq!(cm.first_valid_wal_version(), None);
        cm.register_memtable(info(1, 5, 10));
        cm.register_memtable(info(2, 2, 10));
        assert_eq!(cm.first_valid_wal_version(), Some(FileVersion(2)));
    }

    #[test]
    fn total_active_cost_sums_live_memtables() {
        let cm = CheckpointManager::new();
        cm.register_memtable(info(1, 0, 10));
        cm.register_memtable(info(2, 0, 25));
        assert_eq!(cm.total_active_cost(), Cost(35));
        cm.flush_memtable(MemTableId(1));
        assert_eq!(cm.total_active_cost(), Cost(25));
    }
}
