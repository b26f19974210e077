//! One backend shared between threads.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::vfs::{FileHandle, FileSystem, FsResult, HostId, Metadata, Modes, StatFs};

/// Cloneable handle onto one backend instance.
///
/// Each contract call takes the lock for exactly its own duration, so
/// calls from different threads are serialised but never interleaved.
pub struct SharedFs<F> {
    inner: Arc<Mutex<F>>,
}

impl<F> Clone for SharedFs<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: FileSystem> SharedFs<F> {
    pub fn new(fs: F) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    /// Run `op` with the lock held.
    pub fn with<R>(&self, op: impl FnOnce(&mut F) -> R) -> R {
        op(&mut self.inner.lock())
    }

    /// Hold the lock across several calls.
    pub fn lock(&self) -> MutexGuard<'_, F> {
        self.inner.lock()
    }
}

impl<F: FileSystem> FileSystem for SharedFs<F> {
    fn host_id(&self) -> HostId {
        self.inner.lock().host_id()
    }

    fn create_file(&mut self, md: &Metadata, request_write: bool) -> FsResult<FileHandle> {
        self.with(|fs| fs.create_file(md, request_write))
    }

    fn open_file(&mut self, path: &str, request_write: bool) -> FsResult<FileHandle> {
        self.with(|fs| fs.open_file(path, request_write))
    }

    fn close_file(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.with(|fs| fs.close_file(fh))
    }

    fn read_file(&mut self, fh: &FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.with(|fs| fs.read_file(fh, offset, buf))
    }

    fn write_file(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        self.with(|fs| fs.write_file(fh, data, offset))
    }

    fn resize_file(&mut self, path: &str, size: u64) -> FsResult<()> {
        self.with(|fs| fs.resize_file(path, size))
    }

    fn create_directory(&mut self, path: &str, md: &Metadata) -> FsResult<()> {
        self.with(|fs| fs.create_directory(path, md))
    }

    fn read_directory(&self, path: &str) -> FsResult<Vec<Metadata>> {
        self.inner.lock().read_directory(path)
    }

    fn create_link(&mut self, target: &str, link: &str) -> FsResult<()> {
        self.with(|fs| fs.create_link(target, link))
    }

    fn read_link(&self, path: &str) -> FsResult<String> {
        self.inner.lock().read_link(path)
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        self.with(|fs| fs.remove(path))
    }

    fn remove_recursive(&mut self, path: &str) -> FsResult<()> {
        self.with(|fs| fs.remove_recursive(path))
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        self.with(|fs| fs.rename(from, to))
    }

    fn read_metadata(&self, path: &str) -> FsResult<Metadata> {
        self.inner.lock().read_metadata(path)
    }

    fn set_owner(&mut self, path: &str, user: &str, group: &str) -> FsResult<()> {
        self.with(|fs| fs.set_owner(path, user, group))
    }

    fn set_mode(&mut self, path: &str, modes: Modes) -> FsResult<()> {
        self.with(|fs| fs.set_mode(path, modes))
    }

    fn stat_fs(&self) -> FsResult<StatFs> {
        self.inner.lock().stat_fs()
    }

    /// Open, read and close under one lock.
    fn read_all(&mut self, path: &str) -> FsResult<Vec<u8>> {
        self.with(|fs| fs.read_all(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::BufferFile;
    use crate::vfs::TreeBackend;
    use std::thread;

    #[test]
    fn test_clones_share_one_backend() {
        let mut tree = TreeBackend::new();
        tree.add_file("/f", BufferFile::with_contents("x")).unwrap();
        let shared = SharedFs::new(tree);

        let mut other = shared.clone();
        other.remove("/f").unwrap();
        assert!(!shared.exists("/f"));
        assert_eq!(shared.host_id(), other.host_id());
    }

    #[test]
    fn test_threads_get_distinct_handles() {
        let mut tree = TreeBackend::new();
        tree.add_file("/f", BufferFile::new()).unwrap();
        let shared = SharedFs::new(tree);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let mut fs = shared.clone();
                thread::spawn(move || fs.open_file("/f", false).unwrap())
            })
            .collect();
        let mut ids: Vec<u32> = workers
            .into_iter()
            .map(|w| w.join().unwrap().local_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(shared.lock().open_handles(), 8);
    }
}
