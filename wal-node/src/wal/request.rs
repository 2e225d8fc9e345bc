//! Reconstructs logical write requests from the WAL entries that share a
//! consensus search index. A logical write can be split across several
//! `WalEntry` records (e.g. a tablet sliced by size); this is where
//! those records are folded back into one `Request`.

use crate::wal::entry::WalEntry;
use wal_core::{DeviceId, Payload, SearchIndex};

/// A reconstructed logical write, ready to hand back to whatever is
/// replaying the log by search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    InsertRow {
        device_id: DeviceId,
        search_index: SearchIndex,
        payload: Payload,
    },
    InsertRowsOfOneDevice {
        device_id: DeviceId,
        search_index: SearchIndex,
        rows: Vec<Payload>,
    },
    InsertRows {
        search_index: SearchIndex,
        rows: Vec<(DeviceId, Payload)>,
    },
    InsertTablet {
        device_id: DeviceId,
        search_index: SearchIndex,
        start: u32,
        end: u32,
        payload: Payload,
    },
    InsertMultiTablet {
        device_id: DeviceId,
        search_index: SearchIndex,
        slices: Vec<(u32, u32, Payload)>,
    },
    Delete {
        search_index: SearchIndex,
        payload: Payload,
    },
}

impl Request {
    pub fn search_index(&self) -> SearchIndex {
        match self {
            Request::InsertRow { search_index, .. }
            | Request::InsertRowsOfOneDevice { search_index, .. }
            | Request::InsertRows { search_index, .. }
            | Request::InsertTablet { search_index, .. }
            | Request::InsertMultiTablet { search_index, .. }
            | Request::Delete { search_index, .. } => *search_index,
        }
    }
}

/// Fold a run of entries that all share one search index into a single
/// `Request`. Returns `None` for an empty run (nothing to merge).
///
/// Entries that somehow mix kinds under one search index (a caller
/// ordering bug — insert and delete should never share an index) log a
/// warning and are resolved by keeping only the first entry, rather than
/// guessing at a merge.
pub fn merge_insert_nodes(entries: Vec<WalEntry>) -> Option<Request> {
    let search_index = entries.first()?.search_index();

    if entries.len() == 1 {
        return single_to_request(entries.into_iter().next().unwrap());
    }

    let all_tablets = entries.iter().all(|e| matches!(e, WalEntry::InsertTablet { .. }));
    let all_rows = entries.iter().all(|e| matches!(e, WalEntry::InsertRow { .. }));

    if all_tablets {
        let device_id = match &entries[0] {
            WalEntry::InsertTablet { device_id, .. } => device_id.clone(),
            _ => unreachable!(),
        };
        let slices = entries
            .into_iter()
            .filter_map(|e| match e {
                WalEntry::InsertTablet { start, end, payload, .. } => Some((start, end, payload)),
                _ => None,
            })
            .collect();
        return Some(Request::InsertMultiTablet {
            device_id,
            search_index,
            slices,
        });
    }

    if all_rows {
        let first_device = match &entries[0] {
            WalEntry::InsertRow { device_id, .. } => device_id.clone(),
            _ => unreachable!(),
        };
        let same_device = entries.iter().all(|e| {
            matches!(e, WalEntry::InsertRow { device_id, .. } if *device_id == first_device)
        });
        if same_device {
            let rows = entries
                .into_iter()
                .filter_map(|e| match e {
                    WalEntry::InsertRow { payload, .. } => Some(payload),
                    _ => None,
                })
                .collect();
            return Some(Request::InsertRowsOfOneDevice {
                device_id: first_device,
                search_index,
                rows,
            });
        }
        let rows = entries
            .into_iter()
            .filter_map(|e| match e {
                WalEntry::InsertRow { device_id, payload, .. } => Some((device_id, payload)),
                _ => None,
            })
            .collect();
        return Some(Request::InsertRows { search_index, rows });
    }

    log::warn!(
        "search index {search_index} groups {} entries of mixed kinds; using only the first",
        entries.len()
    );
    single_to_request(entries.into_iter().next().unwrap())
}

fn single_to_request(entry: WalEntry) -> Option<Request> {
    match entry {
        WalEntry::InsertRow { device_id, search_index, payload, .. } => Some(Request::InsertRow {
            device_id,
            search_index,
            payload,
        }),
        WalEntry::InsertTablet { device_id, search_index, start, end, payload, .. } => {
            Some(Request::InsertTablet {
                device_id,
                search_index,
                start,
                end,
                payload,
            })
        }
        WalEntry::Delete { search_index, payload, .. } => Some(Request::Delete { search_index, payload }),
        WalEntry::MemTableSnapshot { .. } | WalEntry::Signal { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wal_core::MemTableId;

    fn row(device: &str, idx: u64, payload: &str) -> WalEntry {
        WalEntry::InsertRow {
            memtable_id: MemTableId(1),
            search_index: SearchIndex(idx),
            device_id: device.as_bytes().to_vec(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn tablet(device: &str, idx: u64, start: u32, end: u32) -> WalEntry {
        WalEntry::InsertTablet {
            memtable_id: MemTableId(1),
            search_index: SearchIndex(idx),
            device_id: device.as_bytes().to_vec(),
            start,
            end,
            payload: vec![0; (end - start) as usize],
        }
    }

    #[test]
    fn single_entry_passes_through() {
        let req = merge_insert_nodes(vec![row("d1", 1, "a")]).unwrap();
        assert!(matches!(req, Request::InsertRow { .. }));
    }

    #[test]
    fn same_device_rows_fold_into_one_device_request() {
        let req = merge_insert_nodes(vec![row("d1", 5, "a"), row("d1", 5, "b")]).unwrap();
        match req {
            Request::InsertRowsOfOneDevice { device_id, rows, search_index } => {
                assert_eq!(device_id, b"d1");
                assert_eq!(search_index, SearchIndex(5));
                assert_eq!(rows, vec![b"a".to_vec(), b"b".to_vec()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mixed_device_rows_fold_into_generic_request() {
        let req = merge_insert_nodes(vec![row("d1", 5, "a"), row("d2", 5, "b")]).unwrap();
        match req {
            Request::InsertRows { rows, .. } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].0, b"d1");
                assert_eq!(rows[1].0, b"d2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tablet_slices_fold_preserving_order() {
        let req = merge_insert_nodes(vec![tablet("d1", 9, 0, 10), tablet("d1", 9, 10, 20)]).unwrap();
        match req {
            Request::InsertMultiTablet { slices, .. } => {
                assert_eq!(slices[0].0, 0);
                assert_eq!(slices[0].1, 10);
                assert_eq!(slices[1].0, 10);
                assert_eq!(slices[1].1, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_group_merges_to_nothing() {
        assert!(merge_insert_nodes(vec![]).is_none());
    }
}
