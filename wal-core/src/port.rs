//! Outbound capability port standing in for the storage engine.
//!
//! The storage engine and the consensus layer are out-of-scope external
//! collaborators (spec.md §1): the reclaimer only ever needs to ask one to
//! flush a memtable and poll its status, and to briefly pause writers
//! while it snapshots a memtable into the WAL. Modeling that as a trait
//! object injected at construction avoids a cyclic `Arc<StorageEngine>` /
//! `Arc<WalNode>` dependency — the node holds only the capability, never
//! the engine itself.

use crate::types::{FlushStatus, MemTableId};
use crate::Result;

/// Held for the duration of a memtable snapshot to pause inserts to that
/// memtable. Dropping the guard releases the lock.
pub trait RegionWriteGuard: Send {}

/// Capability the WAL node's reclaimer uses to unblock its own garbage
/// collection by asking the storage engine to make progress.
pub trait StorageEnginePort: Send + Sync {
    /// Ask the engine to flush the given memtable's time partition.
    /// Returns once the request has been accepted, not once flushing is
    /// complete — callers poll `flush_status` for that.
    fn submit_flush(&self, memtable_id: MemTableId) -> Result<()>;

    /// Current flush state of a memtable.
    fn flush_status(&self, memtable_id: MemTableId) -> Result<FlushStatus>;

    /// Pause inserts to this memtable's region for the duration of a WAL
    /// snapshot. Held briefly, released when the returned guard drops.
    fn acquire_region_write_lock(&self, memtable_id: MemTableId) -> Result<Box<dyn RegionWriteGuard>>;
}
