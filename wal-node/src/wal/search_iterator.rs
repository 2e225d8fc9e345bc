//! Replays the log in consensus search-index order, reconstructing one
//! logical [`Request`] per index regardless of how its entries were
//! split or which file(s) they landed in.
//!
//! A request is only yielded once its group of entries closes — either
//! because a later entry arrives with a larger search index, or because
//! the file it's in rolls over and a newer file picks up where it left
//! off. An iterator positioned at the tail of the log blocks (via
//! [`WalBuffer::wait_for_flush`]) rather than spinning.

use crate::wal::buffer::WalBuffer;
use crate::wal::entry::WalEntry;
use crate::wal::file_layout::{binary_search_file_by_search_index, list_files, FileLocation, WalFileEntry};
use crate::wal::reader::WalReader;
use crate::wal::request::{merge_insert_nodes, Request};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use wal_core::{Error, Result, SearchIndex};

#[derive(Clone, Copy)]
struct Cursor {
    file_idx: usize,
    offset: u64,
}

pub struct SearchIterator {
    dir: PathBuf,
    buffer: WalBuffer,
    next_search_index: SearchIndex,
    files: Vec<WalFileEntry>,
    cursor: Option<Cursor>,
    dirty: bool,
    carry: Vec<WalEntry>,
    pending: VecDeque<Request>,
}

impl SearchIterator {
    pub(crate) fn new(dir: PathBuf, buffer: WalBuffer, start: SearchIndex) -> Self {
        Self {
            dir,
            buffer,
            next_search_index: start,
            files: Vec::new(),
            cursor: None,
            dirty: true,
            carry: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// True if a request for `next_search_index` (or a later one, if
    /// there's a gap) is ready to return from `next()` without blocking.
    pub fn has_next(&mut self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        self.scan();
        !self.pending.is_empty()
    }

    /// Pop the next ready request, advancing `next_search_index` past it.
    pub fn next(&mut self) -> Option<Request> {
        if !self.has_next() {
            return None;
        }
        let req = self.pending.pop_front()?;
        let returned_index = req.search_index();
        if returned_index.0 != self.next_search_index.0 {
            log::warn!(
                "search iterator gap: expected index {}, got {returned_index}",
                self.next_search_index
            );
        }
        self.next_search_index = returned_index.succ();
        Some(req)
    }

    /// Block until `has_next()` would return true.
    pub fn wait_for_next_ready(&mut self) {
        while !self.has_next() {
            self.buffer.wait_for_flush();
        }
    }

    /// Block until `has_next()` would return true, or return a timeout
    /// error if `timeout` elapses first.
    pub fn wait_for_next_ready_timeout(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_next() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }
            self.buffer.wait_for_flush_timeout(remaining);
            if Instant::now() >= deadline {
                return Err(Error::Timeout(timeout));
            }
        }
    }

    /// Jump straight to `target`, discarding any buffered state tied to
    /// the old position.
    pub fn skip_to(&mut self, target: SearchIndex) {
        if target.0 < self.next_search_index.0 {
            log::warn!(
                "search iterator skip_to({target}) rewinds past current position {}",
                self.next_search_index
            );
        }
        self.next_search_index = target;
        self.files.clear();
        self.cursor = None;
        self.carry.clear();
        self.pending.clear();
        self.dirty = true;
    }

    fn scan(&mut self) {
        loop {
            if self.dirty {
                let files = match list_files(&self.dir) {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("search iterator: failed to list WAL files: {e}");
                        return;
                    }
                };
                if files.is_empty() {
                    self.files = files;
                    return;
                }
                let start_idx = match binary_search_file_by_search_index(&files, self.next_search_index) {
                    FileLocation::BeforeFirst => 0,
                    FileLocation::At(i) => i,
                };
                self.files = files;
                self.cursor = Some(Cursor { file_idx: start_idx, offset: 0 });
                self.carry.clear();
                self.dirty = false;
            }

            let Some(cursor) = self.cursor else { return };
            if cursor.file_idx >= self.files.len() {
                let fresh = match list_files(&self.dir) {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("search iterator: failed to list WAL files: {e}");
                        return;
                    }
                };
                if fresh.len() == self.files.len() {
                    return; // nothing new to read right now
                }
                self.files = fresh;
                continue;
            }

            let file = self.files[cursor.file_idx].clone();
            let mut reader = match WalReader::open_at(&file.path, cursor.offset) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("search iterator: failed to open {}: {e}", file.path.display());
                    self.advance_past_current_file();
                    continue;
                }
            };

            let mut last_good_offset = cursor.offset;
            let mut corrupted = false;
            loop {
                match reader.read_entry() {
                    Ok(Some(entry)) => {
                        self.handle_entry(entry);
                        last_good_offset = match reader.position() {
                            Ok(pos) => pos,
                            Err(_) => last_good_offset,
                        };
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!(
                            "search iterator: corruption in {} at offset {last_good_offset}: {e}",
                            file.path.display()
                        );
                        corrupted = true;
                        break;
                    }
                }
            }

            if let Some(cursor) = self.cursor.as_mut() {
                cursor.offset = last_good_offset;
            }

            if corrupted {
                self.advance_past_current_file();
                continue;
            }

            let is_last_known_file = cursor.file_idx + 1 == self.files.len();
            if !is_last_known_file {
                self.advance_past_current_file();
                continue;
            }

            // Caught up to the tail of the newest known file. See if a
            // roll happened concurrently; if not, stop for now.
            let fresh = match list_files(&self.dir) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("search iterator: failed to list WAL files: {e}");
                    return;
                }
            };
            if fresh.len() > self.files.len() {
                self.files = fresh;
                continue;
            }
            return;
        }
    }

    fn advance_past_current_file(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.file_idx += 1;
            cursor.offset = 0;
        }
    }

    fn handle_entry(&mut self, entry: WalEntry) {
        let si = entry.search_index();
        if si.is_none() {
            return; // signals and snapshots carry no search index
        }
        if si.0 < self.next_search_index.0 {
            if !self.carry.is_empty() && self.carry[0].search_index() != si {
                self.emit_group();
            }
            return;
        }
        if self.carry.is_empty() || self.carry[0].search_index() == si {
            self.carry.push(entry);
        } else {
            self.emit_group();
            self.carry.push(entry);
        }
    }

    fn emit_group(&mut self) {
        let group = std::mem::take(&mut self.carry);
        if group.is_empty() {
            return;
        }
        if group[0].search_index().0 < self.next_search_index.0 {
            return;
        }
        if let Some(req) = merge_insert_nodes(group) {
            self.pending.push_back(req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use tempfile::tempdir;
    use wal_core::MemTableId;

    fn row(idx: u64, device: &str, payload: &str) -> WalEntry {
        WalEntry::InsertRow {
            memtable_id: MemTableId(1),
            search_index: SearchIndex(idx),
            device_id: device.as_bytes().to_vec(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn replays_sequential_single_entry_groups() {
        let dir = tempdir().unwrap();
        let buffer = WalBuffer::open(dir.path(), WalConfig::default()).unwrap();
        for i in 1..=3u64 {
            buffer.write(row(i, "d1", "x")).unwrap().wait().unwrap();
        }

        let mut it = SearchIterator::new(dir.path().to_path_buf(), buffer, SearchIndex(1));
        let mut seen = Vec::new();
        while it.has_next() {
            seen.push(it.next().unwrap().search_index());
        }
        assert_eq!(seen, vec![SearchIndex(1), SearchIndex(2), SearchIndex(3)]);
    }

    #[test]
    fn groups_entries_sharing_a_search_index() {
        let dir = tempdir().unwrap();
        let buffer = WalBuffer::open(dir.path(), WalConfig::default()).unwrap();
        buffer.write(row(1, "d1", "a")).unwrap().wait().unwrap();
        buffer.write(row(1, "d1", "b")).unwrap().wait().unwrap();
        buffer.write(row(2, "d1", "c")).unwrap().wait().unwrap();

        let mut it = SearchIterator::new(dir.path().to_path_buf(), buffer, SearchIndex(1));
        assert!(it.has_next());
        let first = it.next().unwrap();
        assert!(matches!(first, Request::InsertRowsOfOneDevice { .. }));
        assert!(it.has_next());
        let second = it.next().unwrap();
        assert!(matches!(second, Request::InsertRow { .. }));
    }

    #[test]
    fn does_not_emit_trailing_unclosed_group() {
        let dir = tempdir().unwrap();
        let buffer = WalBuffer::open(dir.path(), WalConfig::default()).unwrap();
        buffer.write(row(1, "d1", "a")).unwrap().wait().unwrap();

        let mut it = SearchIterator::new(dir.path().to_path_buf(), buffer.clone(), SearchIndex(1));
        // Only one entry has landed for search index 1; since a later
        // entry could still extend this group, nothing should be ready.
        assert!(!it.has_next());

        buffer.write(row(2, "d1", "b")).unwrap().wait().unwrap();
        assert!(it.has_next());
        let req = it.next().unwrap();
        assert_eq!(req.search_index(), SearchIndex(1));
    }

    #[test]
    fn skip_to_relocates_without_replaying_earlier_entries() {
        let dir = tempdir().unwrap();
        let buffer = WalBuffer::open(dir.path(), WalConfig::default()).unwrap();
        for i in 1..=5u64 {
            buffer.write(row(i, "d1", "x")).unwrap().wait().unwrap();
        }

        let mut it = SearchIterator::new(dir.path().to_path_buf(), buffer, SearchIndex(1));
        it.skip_to(SearchIndex(4));
        assert!(it.has_next());
        assert_eq!(it.next().unwrap().search_index(), SearchIndex(4));
    }
}
