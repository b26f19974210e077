//! Property-based tests for the path-tree backend
//!
//! Uses proptest to drive random namespaces and handle traffic through
//! `TreeBackend` and check the contract holds.

use plexfs_kernel::{FileSystem, FsError, Metadata, TreeBackend};
use proptest::prelude::*;
use std::collections::HashSet;

/// Strategies for generating namespace input
mod strategies {
    use proptest::prelude::*;

    /// A single path segment
    pub fn segment() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-z0-9_]{1,8}").unwrap()
    }

    /// An absolute path of one to four segments
    pub fn path() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..4).prop_map(|segs| format!("/{}", segs.join("/")))
    }

    /// Arbitrary file contents
    pub fn contents() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..512)
    }

    /// A sequence of opens (`true`) and closes (`false`)
    pub fn handle_traffic() -> impl Strategy<Value = Vec<bool>> {
        prop::collection::vec(any::<bool>(), 1..64)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Bytes written at an offset read back unchanged, preceded by zeros
    #[test]
    fn write_then_read_round_trips(
        path in strategies::path(),
        data in strategies::contents(),
        offset in 0u64..256,
    ) {
        let mut fs = TreeBackend::new();
        let fh = fs.create_file(&Metadata::file(&path), true).unwrap();
        prop_assert_eq!(fs.write_file(&fh, &data, offset).unwrap(), data.len());
        fs.close_file(&fh).unwrap();

        let all = fs.read_all(&path).unwrap();
        let start = offset as usize;
        prop_assert_eq!(all.len(), start + data.len());
        prop_assert!(all[..start].iter().all(|&b| b == 0));
        prop_assert_eq!(&all[start..], &data[..]);
    }

    /// Live handle ids stay below the peak number of open handles
    #[test]
    fn handle_ids_are_compact(traffic in strategies::handle_traffic()) {
        let mut fs = TreeBackend::new();
        let fh = fs.create_file(&Metadata::file("/f"), true).unwrap();
        let mut open = vec![fh];
        let mut peak = open.len();

        for step in traffic {
            if step {
                open.push(fs.open_file("/f", false).unwrap());
            } else if let Some(fh) = open.pop() {
                fs.close_file(&fh).unwrap();
            }
            peak = peak.max(open.len());

            let ids: HashSet<u32> = open.iter().map(|fh| fh.local_id).collect();
            prop_assert_eq!(ids.len(), open.len(), "handle ids must be unique");
            prop_assert!(open.iter().all(|fh| (fh.local_id as usize) < peak + 1));
            prop_assert_eq!(fs.open_handles(), open.len());
        }
    }

    /// Paths that were never created are never found
    #[test]
    fn never_created_paths_are_missing(
        created in prop::collection::vec(strategies::path(), 0..8),
        target in strategies::path(),
    ) {
        let mut fs = TreeBackend::new();
        for path in &created {
            // a path may collide with an earlier file; that's fine
            if let Ok(fh) = fs.create_file(&Metadata::file(path), true) {
                fs.close_file(&fh).unwrap();
            }
        }

        let reachable = created.iter().any(|p| p == &target || p.starts_with(&format!("{target}/")));
        if !reachable {
            prop_assert!(matches!(fs.read_metadata(&target), Err(FsError::NoSuchPath(_))));
            prop_assert!(matches!(fs.open_file(&target, false), Err(FsError::NoSuchPath(_))));
        }
    }

    /// Removing everything that was created leaves only the root behind
    #[test]
    fn forced_removal_reclaims_entries(paths in prop::collection::vec(strategies::path(), 1..8)) {
        let mut fs = TreeBackend::new();
        let mut handles = Vec::new();
        for path in &paths {
            if let Ok(fh) = fs.create_file(&Metadata::file(path), true) {
                handles.push(fh);
            }
        }
        for fh in &handles {
            fs.close_file(fh).unwrap();
        }

        let tops: HashSet<String> = fs
            .read_directory("/")
            .unwrap()
            .into_iter()
            .map(|md| md.path)
            .collect();
        for top in tops {
            fs.remove_recursive(&top).unwrap();
        }
        prop_assert_eq!(fs.entry_count(), 1);
        prop_assert!(fs.read_directory("/").unwrap().is_empty());
    }
}
