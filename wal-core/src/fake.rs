//! In-memory `StorageEnginePort` double for tests.
//!
//! This is the "tests supply a fake" half of spec.md §9's capability-port
//! design note, made concrete so `wal-node`'s reclaimer tests (and anyone
//! else exercising `WalNode` without a real storage engine) don't each
//! reinvent it.

use crate::port::{RegionWriteGuard, StorageEnginePort};
use crate::types::{FlushStatus, MemTableId};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

struct FakeGuard;
impl RegionWriteGuard for FakeGuard {}

/// A `StorageEnginePort` whose flush status per memtable is set directly
/// by the test, rather than by an actual flush pipeline.
#[derive(Default)]
pub struct FakeStorageEngine {
    status: Mutex<HashMap<MemTableId, FlushStatus>>,
    submitted: Mutex<Vec<MemTableId>>,
}

impl FakeStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or override) the status reported for a memtable.
    pub fn set_status(&self, id: MemTableId, status: FlushStatus) {
        self.status.lock().insert(id, status);
    }

    /// Memtables that `submit_flush` has been called for, in call order.
    pub fn submitted(&self) -> Vec<MemTableId> {
        self.submitted.lock().clone()
    }
}

impl StorageEnginePort for FakeStorageEngine {
    fn submit_flush(&self, memtable_id: MemTableId) -> Result<()> {
        self.submitted.lock().push(memtable_id);
        self.status
            .lock()
            .insert(memtable_id, FlushStatus::Flushing);
        Ok(())
    }

    fn flush_status(&self, memtable_id: MemTableId) -> Result<FlushStatus> {
        Ok(self
            .status
            .lock()
            .get(&memtable_id)
            .copied()
            .unwrap_or(FlushStatus::Working))
    }

    fn acquire_region_write_lock(
        &self,
        _memtable_id: MemTableId,
    ) -> Result<Box<dyn RegionWriteGuard>> {
        Ok(Box::new(FakeGuard))
    }
}
