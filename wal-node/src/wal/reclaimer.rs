//! Garbage collection for WAL files, plus the feedback loop that keeps
//! the log from growing unbounded when the storage engine falls behind.
//!
//! Implemented as methods on [`WalNode`] rather than a separate struct:
//! every step needs direct access to state `WalNode` already owns (the
//! buffer, the checkpoint manager, the storage-engine port), and
//! threading a second set of `Arc` handles through a standalone
//! `Reclaimer` would just duplicate that ownership for no benefit.

use crate::wal::file_layout::list_files;
use crate::wal::node::WalNode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wal_core::{FileVersion, FlushStatus, MemTableId, SignalKind};

/// What one `delete_outdated_files` call actually did, for logging and
/// tests.
#[derive(Debug, Default, Clone)]
pub struct ReclaimReport {
    pub deleted_versions: Vec<FileVersion>,
    pub snapshot_taken: Option<MemTableId>,
    pub flush_triggered: Option<MemTableId>,
}

impl WalNode {
    /// Run one pass of reclamation: delete files no longer needed for
    /// replay, then — if the log's effective-information ratio is too
    /// low — snapshot or flush the oldest live memtable and try once
    /// more.
    pub fn delete_outdated_files(&self) -> ReclaimReport {
        self.metrics().record_reclaim_run();
        let mut report = ReclaimReport::default();
        self.reclaim_once(&mut report, true);
        report
    }

    fn reclaim_once(&self, report: &mut ReclaimReport, allow_recurse: bool) {
        let v_star = match self.checkpoint.first_valid_wal_version() {
            Some(v) => v,
            None => {
                // No live memtables at all: nothing pins the log, but we
                // still need a version number to compare files against.
                // A forced roll makes the buffer's current version a
                // safe upper bound (nothing before it can be newer).
                if let Err(e) = self.force_roll() {
                    log::warn!("reclaimer: forced roll failed, skipping this pass: {e}");
                    return;
                }
                self.buffer.current_version()
            }
        };

        let safely_deleted = self.safely_deleted_search_index();
        let files = match list_files(&self.dir) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("reclaimer: failed to list WAL files: {e}");
                return;
            }
        };
        for file in &files {
            if file.version.0 < v_star.0 && file.start_search_index.0 < safely_deleted.0 {
                match std::fs::remove_file(&file.path) {
                    Ok(()) => {
                        self.metrics().record_file_deleted();
                        let mut ledger = self.flushed_cost_by_file_version.lock();
                        if let Some(cost) = ledger.remove(&file.version) {
                            self.total_flushed_cost.fetch_sub(cost.0, Ordering::Relaxed);
                        }
                        report.deleted_versions.push(file.version);
                    }
                    Err(e) => {
                        log::warn!("reclaimer: failed to delete {}: {e}", file.path.display());
                    }
                }
            }
        }

        if safely_deleted.0 == 0 {
            log::debug!("reclaimer: safely_deleted_search_index still unset; log is pinned by replay needs");
            return;
        }

        let active = self.checkpoint.total_active_cost();
        let flushed = self.total_flushed_cost.load(Ordering::Relaxed);
        let denom = active.0 + flushed;
        let ratio = if denom == 0 { 1.0 } else { active.0 as f64 / denom as f64 };
        if ratio >= self.config.wal_min_effective_info_ratio {
            return;
        }

        let Some(oldest) = self.checkpoint.oldest_memtable() else {
            return;
        };
        let snapshot_count = self
            .memtable_snapshot_count
            .lock()
            .get(&oldest.memtable_id)
            .copied()
            .unwrap_or(0);
        let should_flush = snapshot_count >= self.config.max_wal_memtable_snapshot_num
            || oldest.cost.0 > self.config.wal_memtable_snapshot_threshold.0;

        if should_flush {
            self.flush_oldest_memtable(oldest.memtable_id, report);
        } else {
            self.snapshot_memtable(oldest.memtable_id, report);
        }

        if allow_recurse {
            self.reclaim_once(report, false);
        }
    }

    fn force_roll(&self) -> wal_core::Result<()> {
        self.buffer
            .write(crate::wal::entry::WalEntry::Signal {
                kind: SignalKind::RollWalLogWriter { wait: true },
            })?
            .wait()
    }

    fn snapshot_memtable(&self, id: MemTableId, report: &mut ReclaimReport) {
        *self.memtable_snapshot_count.lock().entry(id).or_insert(0) += 1;

        if let Err(e) = self.force_roll() {
            log::warn!("reclaimer: roll before snapshot of {id} failed: {e}");
            return;
        }
        let new_version = self.buffer.current_version();
        if let Err(e) = self.checkpoint.set_first_file_version(id, new_version) {
            log::warn!("reclaimer: advancing first_file_version for {id} failed: {e}");
            return;
        }

        let guard = match self.engine.acquire_region_write_lock(id) {
            Ok(g) => g,
            Err(e) => {
                log::warn!("reclaimer: acquiring region write lock for {id} failed: {e}");
                return;
            }
        };
        // The snapshot's payload is produced by the storage engine (it
        // owns the memtable's actual contents); the WAL only records
        // that a snapshot happened at this point in the log.
        let result = self
            .log_memtable_snapshot(id, Vec::new())
            .and_then(|listener| listener.wait());
        drop(guard);

        match result {
            Ok(()) => {
                report.snapshot_taken = Some(id);
                self.metrics().record_snapshot();
            }
            Err(e) => log::warn!("reclaimer: appending snapshot entry for {id} failed: {e}"),
        }
    }

    fn flush_oldest_memtable(&self, id: MemTableId, report: &mut ReclaimReport) {
        match self.engine.flush_status(id) {
            Ok(FlushStatus::Working) => {
                if let Err(e) = self.engine.submit_flush(id) {
                    log::warn!("reclaimer: submit_flush for {id} failed: {e}");
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("reclaimer: flush_status for {id} failed: {e}");
                return;
            }
        }

        let start = Instant::now();
        loop {
            match self.engine.flush_status(id) {
                Ok(FlushStatus::Flushed) => {
                    report.flush_triggered = Some(id);
                    self.metrics().record_flush_triggered();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("reclaimer: flush_status for {id} failed: {e}");
                    return;
                }
            }
            if start.elapsed() >= self.config.flush_poll_timeout {
                log::debug!("reclaimer: flush of {id} still pending, will retry next tick");
                return;
            }
            std::thread::sleep(self.config.flush_poll_interval);
        }
    }

    /// Spawn a background thread that calls `delete_outdated_files`
    /// every `interval`, until the node is closed.
    pub fn spawn_periodic_reclaim(self: &Arc<Self>, interval: Duration) -> std::thread::JoinHandle<()> {
        let node = Arc::clone(self);
        std::thread::Builder::new()
            .name("wal-reclaimer".into())
            .spawn(move || loop {
                std::thread::sleep(interval);
                if node.is_closed() {
                    break;
                }
                node.delete_outdated_files();
            })
            .expect("failed to spawn WAL reclaimer thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use crate::wal::node::WalNode;
    use tempfile::tempdir;
    use wal_core::{FakeStorageEngine, SearchIndex};

    fn node(dir: &std::path::Path, config: WalConfig) -> (WalNode, Arc<FakeStorageEngine>) {
        let engine = Arc::new(FakeStorageEngine::new());
        let node = WalNode::open(dir, config, engine.clone() as Arc<dyn wal_core::StorageEnginePort>).unwrap();
        (node, engine)
    }

    #[test]
    fn deletes_files_before_the_version_floor_and_index_watermark() {
        let dir = tempdir().unwrap();
        let (node, _engine) = node(dir.path(), WalConfig::default());

        node.on_memtable_created(MemTableId(1), dir.path().join("t1"));
        for i in 1..=3u64 {
            node.log_insert_row(MemTableId(1), SearchIndex(i), b"d".to_vec(), b"x".to_vec())
                .unwrap()
                .wait()
                .unwrap();
        }
        // Nothing is flushed and nothing is safely deleted yet: a
        // reclaim pass should not touch any file.
        let report = node.delete_outdated_files();
        assert!(report.deleted_versions.is_empty());

        node.set_safely_deleted_search_index(SearchIndex(10));
        node.on_memtable_flushed(MemTableId(1));
        // Force a roll so there's a file version strictly below the
        // buffer's current (empty) version for the floor to exceed.
        node.force_roll().unwrap();
        let report = node.delete_outdated_files();
        assert!(!report.deleted_versions.is_empty());
    }

    #[test]
    fn stays_put_while_safely_deleted_index_is_unset() {
        let dir = tempdir().unwrap();
        let (node, _engine) = node(dir.path(), WalConfig::default());
        node.on_memtable_created(MemTableId(1), dir.path().join("t1"));
        node.log_insert_row(MemTableId(1), SearchIndex(1), b"d".to_vec(), b"x".to_vec())
            .unwrap()
            .wait()
            .unwrap();
        let report = node.delete_outdated_files();
        assert!(report.snapshot_taken.is_none());
        assert!(report.flush_triggered.is_none());
    }

    #[test]
    fn low_effective_ratio_triggers_flush_once_snapshot_budget_is_spent() {
        let dir = tempdir().unwrap();
        let mut config = WalConfig::default();
        config.max_wal_memtable_snapshot_num = 0; // force flush over snapshot
        config.wal_min_effective_info_ratio = 0.9;
        let (node, engine) = node(dir.path(), config);

        // Memtable 1 logs a large row, then gets flushed: its cost moves
        // out of `total_active_cost` and into the flushed-cost ledger.
        node.on_memtable_created(MemTableId(1), dir.path().join("t1"));
        node.log_insert_row(MemTableId(1), SearchIndex(1), b"d".to_vec(), vec![0u8; 100])
            .unwrap()
            .wait()
            .unwrap();
        node.on_memtable_flushed(MemTableId(1));

        // Memtable 2 stays live with a small cost, so the effective-info
        // ratio (active / (active + flushed)) drops well below 0.9.
        node.on_memtable_created(MemTableId(2), dir.path().join("t2"));
        node.log_insert_row(MemTableId(2), SearchIndex(2), b"d".to_vec(), b"x".to_vec())
            .unwrap()
            .wait()
            .unwrap();

        node.set_safely_deleted_search_index(SearchIndex(1));
        engine.set_status(MemTableId(2), FlushStatus::Flushed);

        let report = node.delete_outdated_files();
        assert_eq!(report.flush_triggered, Some(MemTableId(2)));
    }
}
