//! WAL file naming and directory scanning.
//!
//! Files are named `_<version>-<startSearchIndex>-<suffix>.wal`. `version`
//! is strictly increasing across a node's lifetime; `startSearchIndex` is
//! the smallest search index of any insert/delete entry the file holds,
//! or [`SearchIndex::NONE`] if it holds none yet (the currently-active
//! file before its first insert). `suffix` only disambiguates files that
//! would otherwise collide on disk during testing; it carries no meaning
//! on its own.

use std::fmt;
use std::path::{Path, PathBuf};
use wal_core::{FileVersion, SearchIndex};

const EXTENSION: &str = "wal";

/// One WAL file as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileEntry {
    pub version: FileVersion,
    pub start_search_index: SearchIndex,
    pub path: PathBuf,
}

/// Where a search index falls relative to a sorted slice of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    /// Smaller than every known file's `start_search_index` (or there are
    /// no files at all).
    BeforeFirst,
    /// Owned by `files[_]` at this position.
    At(usize),
}

pub fn format_file_name(version: FileVersion, start: SearchIndex, suffix: u32) -> String {
    format!("_{}-{}-{:08x}.{EXTENSION}", version.0, start.0, suffix)
}

/// Parse a file name back into its version and start search index.
/// Returns `None` for anything that doesn't match the naming convention
/// so callers can skip unrelated files in a shared directory.
pub fn parse_file_name(name: &str) -> Option<(FileVersion, SearchIndex)> {
    let stem = name.strip_suffix(&format!(".{EXTENSION}"))?;
    let stem = stem.strip_prefix('_')?;
    let mut parts = stem.split('-');
    let version: u64 = parts.next()?.parse().ok()?;
    let start: u64 = parts.next()?.parse().ok()?;
    let _suffix = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((FileVersion(version), SearchIndex(start)))
}

/// List every recognizable WAL file under `dir`, sorted ascending.
/// Unreadable entries and names that don't parse are skipped (and
/// logged) rather than failing the whole scan.
pub fn list_files(dir: &Path) -> wal_core::Result<Vec<WalFileEntry>> {
    let mut files = Vec::new();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_file_name(name) {
            Some((version, start_search_index)) => files.push(WalFileEntry {
                version,
                start_search_index,
                path,
            }),
            None => log::trace!("skipping non-WAL file {name} in {}", dir.display()),
        }
    }
    ascending_sort(&mut files);
    Ok(files)
}

/// Sort in the order `binary_search_file_by_search_index` expects:
/// ascending by `start_search_index`, ties broken by `version`. A file
/// with no inserts yet carries `SearchIndex::NONE` (`u64::MAX`), which
/// sorts last — exactly where the currently-open, still-empty file
/// belongs.
pub fn ascending_sort(files: &mut [WalFileEntry]) {
    files.sort_by_key(|f| (f.start_search_index, f.version));
}

/// Locate the file whose range `[start_search_index, next.start_search_index)`
/// contains `target`. `files` must already be sorted by [`ascending_sort`].
pub fn binary_search_file_by_search_index(
    files: &[WalFileEntry],
    target: SearchIndex,
) -> FileLocation {
    if files.is_empty() || target < files[0].start_search_index {
        return FileLocation::BeforeFirst;
    }
    match files.binary_search_by_key(&target, |f| f.start_search_index) {
        Ok(mut i) => {
            // Several files can share a start_search_index (ties broken by
            // version); the one actually covering `target` for grouping
            // purposes is the earliest of them.
            while i > 0 && files[i - 1].start_search_index == target {
                i -= 1;
            }
            FileLocation::At(i)
        }
        Err(insert_at) => FileLocation::At(insert_at - 1),
    }
}

impl fmt::Display for WalFileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(start={})",
            self.path.display(),
            self.start_search_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: u64, start: u64) -> WalFileEntry {
        WalFileEntry {
            version: FileVersion(version),
            start_search_index: SearchIndex(start),
            path: PathBuf::from(format_file_name(FileVersion(version), SearchIndex(start), 0)),
        }
    }

    #[test]
    fn name_roundtrips() {
        let name = format_file_name(FileVersion(3), SearchIndex(100), 0xdead_beef);
        assert_eq!(
            parse_file_name(&name),
            Some((FileVersion(3), SearchIndex(100)))
        );
    }

    #[test]
    fn name_roundtrips_with_none_sentinel() {
        let name = format_file_name(FileVersion(0), SearchIndex::NONE, 1);
        assert_eq!(parse_file_name(&name), Some((FileVersion(0), SearchIndex::NONE)));
    }

    #[test]
    fn rejects_unrelated_names() {
        assert_eq!(parse_file_name("not-a-wal-file.txt"), None);
        assert_eq!(parse_file_name("_1-2.wal"), None);
        assert_eq!(parse_file_name("_1-2-3-4.wal"), None);
    }

    #[test]
    fn binary_search_locates_owning_file() {
        let files = vec![entry(0, 0), entry(1, 50), entry(2, 120)];
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(0)),
            FileLocation::At(0)
        );
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(10)),
            FileLocation::At(0)
        );
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(50)),
            FileLocation::At(1)
        );
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(500)),
            FileLocation::At(2)
        );
    }

    #[test]
    fn binary_search_before_first_file() {
        let files = vec![entry(5, 100)];
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(1)),
            FileLocation::BeforeFirst
        );
        assert_eq!(
            binary_search_file_by_search_index(&[], SearchIndex(1)),
            FileLocation::BeforeFirst
        );
    }

    #[test]
    fn binary_search_prefers_earliest_tied_file() {
        let files = vec![entry(0, 50), entry(1, 50), entry(2, 120)];
        assert_eq!(
            binary_search_file_by_search_index(&files, SearchIndex(50)),
            FileLocation::At(0)
        );
    }

    #[test]
    fn active_empty_file_sorts_last() {
        let mut files = vec![entry(2, u64::MAX), entry(0, 0), entry(1, 50)];
        ascending_sort(&mut files);
        assert_eq!(files[2].version, FileVersion(2));
        assert_eq!(files[2].start_search_index, SearchIndex::NONE);
    }
}
