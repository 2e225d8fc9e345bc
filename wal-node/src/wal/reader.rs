//! Sequential and positioned reading of a single WAL file.
//!
//! Mirrors the teacher's `WALReader`: a clean end-of-file (no bytes, or a
//! truncated length prefix — the tell-tale of a crash mid-write) is
//! reported as `Ok(None)`, not an error. A truncated or corrupted record
//! body is a real error, since the writer never leaves one half-written
//! without first having written a complete, checksummed record before it.

use crate::wal::entry::WalEntry;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use wal_core::{Error, Result};

pub struct WalReader {
    reader: BufReader<File>,
}

impl WalReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(Error::IoRead)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Open the file and seek straight to `offset`, for resuming a scan
    /// without re-decoding already-consumed records.
    pub fn open_at(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let mut file = File::open(path).map_err(Error::IoRead)?;
        file.seek(SeekFrom::Start(offset)).map_err(Error::IoRead)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Current byte offset into the file, usable as a resume point for a
    /// later `open_at` call.
    pub fn position(&mut self) -> Result<u64> {
        self.reader.stream_position().map_err(Error::IoRead)
    }

    /// Read the next entry, or `Ok(None)` on a clean end of file.
    pub fn read_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::IoRead(e)),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut record = vec![0u8; 4 + len];
        record[..4].copy_from_slice(&len_buf);
        self.reader
            .read_exact(&mut record[4..])
            .map_err(Error::IoRead)?;

        WalEntry::decode(&record).map(Some)
    }

    /// Read every remaining entry in the file.
    pub fn read_all(mut self) -> Result<Vec<WalEntry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.read_entry()? {
            out.push(entry);
        }
        Ok(out)
    }
}

impl Iterator for WalReader {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
