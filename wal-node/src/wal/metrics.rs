//! Lightweight atomic counters for the WAL node, modeled on the
//! teacher's `WALMetrics`: plain `AtomicU64` fields, a `record_*`/getter
//! split, and a `reset()` for tests. No external metrics exporter is
//! wired up here — that's an embedding-process concern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct WalMetrics {
    writes_total: AtomicU64,
    writes_failed: AtomicU64,
    bytes_written: AtomicU64,
    sync_total: AtomicU64,
    rotation_count: AtomicU64,
    reads_total: AtomicU64,
    corrupted_entries: AtomicU64,
    files_deleted: AtomicU64,
    snapshots_emitted: AtomicU64,
    flushes_triggered: AtomicU64,
    reclaim_runs: AtomicU64,
}

impl WalMetrics {
    pub fn record_write(&self, entries: u64) {
        self.writes_total.fetch_add(entries, Ordering::Relaxed);
    }

    pub fn record_write_failed(&self, entries: u64) {
        self.writes_failed.fetch_add(entries, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_sync(&self) {
        self.sync_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corruption(&self) {
        self.corrupted_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_triggered(&self) {
        self.flushes_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaim_run(&self) {
        self.reclaim_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn writes_total(&self) -> u64 {
        self.writes_total.load(Ordering::Relaxed)
    }

    pub fn writes_failed(&self) -> u64 {
        self.writes_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn sync_total(&self) -> u64 {
        self.sync_total.load(Ordering::Relaxed)
    }

    pub fn rotation_count(&self) -> u64 {
        self.rotation_count.load(Ordering::Relaxed)
    }

    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    pub fn corrupted_entries(&self) -> u64 {
        self.corrupted_entries.load(Ordering::Relaxed)
    }

    pub fn files_deleted(&self) -> u64 {
        self.files_deleted.load(Ordering::Relaxed)
    }

    pub fn snapshots_emitted(&self) -> u64 {
        self.snapshots_emitted.load(Ordering::Relaxed)
    }

    pub fn flushes_triggered(&self) -> u64 {
        self.flushes_triggered.load(Ordering::Relaxed)
    }

    pub fn reclaim_runs(&self) -> u64 {
        self.reclaim_runs.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.writes_total.store(0, Ordering::Relaxed);
        self.writes_failed.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.sync_total.store(0, Ordering::Relaxed);
        self.rotation_count.store(0, Ordering::Relaxed);
        self.reads_total.store(0, Ordering::Relaxed);
        self.corrupted_entries.store(0, Ordering::Relaxed);
        self.files_deleted.store(0, Ordering::Relaxed);
        self.snapshots_emitted.store(0, Ordering::Relaxed);
        self.flushes_triggered.store(0, Ordering::Relaxed);
        self.reclaim_runs.store(0, Ordering::Relaxed);
    }
}

/// Times a single operation and records it against `sync_total`-style
/// counters on completion. Mirrors the teacher's timing helper.
pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn complete(self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let m = WalMetrics::default();
        m.record_write(3);
        m.record_bytes_written(128);
        m.record_rotation();
        assert_eq!(m.writes_total(), 3);
        assert_eq!(m.bytes_written(), 128);
        assert_eq!(m.rotation_count(), 1);
        m.reset();
        assert_eq!(m.writes_total(), 0);
        assert_eq!(m.bytes_written(), 0);
        assert_eq!(m.rotation_count(), 0);
    }
}
