//! Wall clock exposed as a read-only file.

use std::collections::HashMap;

use crate::vfs::module::{read_slice, Module};
use crate::vfs::{FileHandle, FsError, FsResult};

/// Default path the clock is bound at.
pub const TIME_PATH: &str = "/time";

/// Renders the current local time, e.g. `Mon Oct 19 09:41:07 2026`.
pub fn local_ctime() -> String {
    chrono::Local::now()
        .format("%a %b %e %H:%M:%S %Y")
        .to_string()
}

/// Read-only clock.
///
/// Each open captures the time once, so a caller reading in several chunks
/// sees one consistent string. Writes fail `NotSupported`.
pub struct TimeFile {
    clock: fn() -> String,
    snapshots: HashMap<FileHandle, String>,
}

impl Default for TimeFile {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeFile {
    pub fn new() -> Self {
        Self::with_clock(local_ctime)
    }

    /// A clock driven by `clock` instead of the system time.
    pub fn with_clock(clock: fn() -> String) -> Self {
        Self {
            clock,
            snapshots: HashMap::new(),
        }
    }
}

impl Module for TimeFile {
    fn open(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.snapshots.insert(*fh, (self.clock)());
        Ok(())
    }

    fn close(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.snapshots.remove(fh);
        Ok(())
    }

    fn read(&mut self, fh: &FileHandle, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let clock = self.clock;
        let now = self.snapshots.entry(*fh).or_insert_with(clock);
        Ok(read_slice(now.as_bytes(), buf, offset))
    }

    fn write(&mut self, _fh: &FileHandle, _data: &[u8], _offset: u64) -> FsResult<usize> {
        Err(FsError::not_supported("the clock is read-only"))
    }

    fn size(&self) -> u64 {
        (self.clock)().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::HostId;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TICKS: AtomicU32 = AtomicU32::new(0);

    fn ticking_clock() -> String {
        format!("tick {}", TICKS.fetch_add(1, Ordering::SeqCst))
    }

    #[test]
    fn test_snapshot_is_stable_per_handle() {
        let mut clock = TimeFile::with_clock(ticking_clock);
        let fh = FileHandle::new(HostId::new(), 0);
        clock.open(&fh).unwrap();

        let mut first = [0u8; 4];
        clock.read(&fh, &mut first, 0).unwrap();
        let mut rest = [0u8; 16];
        let n = clock.read(&fh, &mut rest, 4).unwrap();

        let whole = format!(
            "{}{}",
            String::from_utf8_lossy(&first),
            String::from_utf8_lossy(&rest[..n])
        );
        assert!(whole.starts_with("tick "));
        // a second read at 4 sees the same snapshot
        let mut again = [0u8; 16];
        assert_eq!(clock.read(&fh, &mut again, 4).unwrap(), n);
        assert_eq!(&again[..n], &rest[..n]);
        clock.close(&fh).unwrap();
    }

    #[test]
    fn test_write_not_supported() {
        let mut clock = TimeFile::new();
        let fh = FileHandle::new(HostId::new(), 0);
        assert!(matches!(
            clock.write(&fh, b"noon", 0),
            Err(FsError::NotSupported(_))
        ));
    }

    #[test]
    fn test_local_ctime_shape() {
        let now = local_ctime();
        assert_eq!(now.len(), 24);
        assert!(!now.ends_with('\n'));
    }
}
