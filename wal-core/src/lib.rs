//! Shared types, error kinds, and storage-engine capability traits for the
//! write-ahead log node.
//!
//! This crate holds no I/O of its own — it is the leaf dependency
//! `wal-node` builds on, the same way `ferrisdb-core` sits underneath
//! `ferrisdb-storage`: scalar newtypes, the crate-wide `Error`/`Result`
//! pair, and the `StorageEnginePort` trait that stands in for the
//! out-of-scope storage engine and consensus layer.

mod error;
#[cfg(feature = "test-util")]
mod fake;
mod port;
mod types;

pub use error::{Error, Result};
#[cfg(feature = "test-util")]
pub use fake::FakeStorageEngine;
pub use port::{RegionWriteGuard, StorageEnginePort};
pub use types::{
    Cost, DeviceId, FileVersion, FlushStatus, MemTableId, MemTableInfo, Payload, SearchIndex,
    SignalKind, SyncMode,
};
