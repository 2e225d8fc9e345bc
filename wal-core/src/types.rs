//! Scalar types shared between the WAL node and its storage-engine collaborator.
//!
//! Individual insert/delete payloads stay opaque `Vec<u8>` all the way
//! through this crate and `wal-node` — only the typed discriminator
//! (`WalEntry`'s variant) and the device id used for merge comparisons are
//! ever inspected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw bytes of a single insert/delete payload. Never decoded by the WAL.
pub type Payload = Vec<u8>;

/// Device identifier carried alongside insert entries, used only by
/// `SearchIterator`'s merge rule to decide whether a run of `InsertRow`
/// entries folds into a single-device request or a generic one.
pub type DeviceId = Vec<u8>;

/// Identifies a live or historical memtable within a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemTableId(pub u64);

impl fmt::Display for MemTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memtable#{}", self.0)
    }
}

/// Monotonic identifier of a WAL file within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileVersion(pub u64);

impl FileVersion {
    pub const FIRST: FileVersion = FileVersion(0);

    pub fn next(self) -> FileVersion {
        FileVersion(self.0 + 1)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus sequence number identifying a logical write. Several
/// consecutive entries may share one `SearchIndex` when a logical write is
/// split across entries by size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchIndex(pub u64);

impl SearchIndex {
    /// Sentinel meaning "no insert has been assigned a search index yet" —
    /// used for signal-only entries and for an empty file's
    /// `start_search_index`.
    pub const NONE: SearchIndex = SearchIndex(u64::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn succ(self) -> SearchIndex {
        SearchIndex(self.0 + 1)
    }
}

impl fmt::Display for SearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Approximate memory (or count) footprint still represented by
/// un-flushed data for one memtable. Unit depends on
/// `WalConfig::enable_mem_control` — bytes when set, an abstract count
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Cost(pub u64);

impl std::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Cost {
    type Output = Cost;
    fn sub(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::SubAssign for Cost {
    fn sub_assign(&mut self, rhs: Cost) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl std::iter::Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost(0), |acc, c| acc + c)
    }
}

/// Durability level for buffer flushes, mirroring the distinct trade-off
/// points a single-writer append engine offers: skip the OS entirely,
/// flush to the OS page cache, or fsync all the way to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Buffer in the writer's `BufWriter`; no explicit flush.
    None,
    /// Flush to the OS on every batch, skip fsync.
    Normal,
    /// Flush and fsync on every batch.
    Full,
}

/// In-band signal entries understood by the buffer's serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Close the current file and open the next one at this point in the
    /// write order. Carries whether the caller wants to wait for the
    /// roll's fsync before considering the signal complete.
    RollWalLogWriter { wait: bool },
}

/// Current flush state of a memtable, as reported by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Still accepting writes, not yet submitted for flush.
    Working,
    /// Flush has been requested and is in progress.
    Flushing,
    /// Flush completed; the memtable's data is durable outside the WAL.
    Flushed,
}

/// Registration record for a live memtable.
///
/// `first_file_version_id` advances when the memtable is snapshotted into
/// a newer WAL file (liveness compaction, not data compaction) — see
/// `Reclaimer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemTableInfo {
    pub memtable_id: MemTableId,
    pub target_tsfile_path: std::path::PathBuf,
    pub first_file_version_id: FileVersion,
    pub cost: Cost,
}
