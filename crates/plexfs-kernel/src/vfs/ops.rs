//! Filesystem contract.
//!
//! Every backend implements [`FileSystem`]. Operations a backend does not
//! provide fall through to the default bodies, which fail with
//! [`FsError::NotImplemented`].
//!
//! All calls are synchronous. A backend instance is not internally
//! synchronised: share it across threads with
//! [`SharedFs`](crate::SharedFs), or drive it from async code through
//! [`FsWorker`](crate::FsWorker).

use super::error::{FsError, FsResult};
use super::types::{FileHandle, HostId, Metadata, Modes, StatFs};

/// Read buffer size used by [`FileSystem::read_all`].
const READ_CHUNK: usize = 64 * 1024;

/// The operation set every backend exposes.
///
/// Paths are `/`-delimited and absolute within the backend's namespace.
pub trait FileSystem: Send {
    /// Identity of this backend instance. Every handle it issues carries it.
    fn host_id(&self) -> HostId;

    // ========================================================================
    // Files
    // ========================================================================

    /// Create the file at `md.path` and open it.
    ///
    /// Fails `InvalidMetadata` unless `md.kind` is `File`, and
    /// `AlreadyExists` if the path is occupied.
    fn create_file(&mut self, md: &Metadata, request_write: bool) -> FsResult<FileHandle> {
        let _ = (md, request_write);
        Err(FsError::NotImplemented("create_file"))
    }

    /// Open an existing file.
    ///
    /// A handle opened without `request_write` rejects every write.
    fn open_file(&mut self, path: &str, request_write: bool) -> FsResult<FileHandle> {
        let _ = (path, request_write);
        Err(FsError::NotImplemented("open_file"))
    }

    /// Release a handle.
    ///
    /// A valid handle is always released, even when the underlying file
    /// reports an error while closing. Closing it again fails
    /// `InvalidFileHandle`.
    fn close_file(&mut self, fh: &FileHandle) -> FsResult<()> {
        let _ = fh;
        Err(FsError::NotImplemented("close_file"))
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes filled, never more than `buf.len()`.
    /// Reading at or past the end returns `Ok(0)`.
    fn read_file(&mut self, fh: &FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let _ = (fh, offset, buf);
        Err(FsError::NotImplemented("read_file"))
    }

    /// Write `data` at `offset`.
    ///
    /// Returns the number of bytes written, never more than `data.len()`.
    fn write_file(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        let _ = (fh, data, offset);
        Err(FsError::NotImplemented("write_file"))
    }

    /// Truncate or extend the file at `path`. Extension reads back as zeros.
    fn resize_file(&mut self, path: &str, size: u64) -> FsResult<()> {
        let _ = (path, size);
        Err(FsError::NotImplemented("resize_file"))
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Create a directory. Fails `InvalidMetadata` unless `md.kind` is
    /// `Directory`.
    fn create_directory(&mut self, path: &str, md: &Metadata) -> FsResult<()> {
        let _ = (path, md);
        Err(FsError::NotImplemented("create_directory"))
    }

    /// Direct children of `path`, each with its fully qualified path.
    fn read_directory(&self, path: &str) -> FsResult<Vec<Metadata>> {
        let _ = path;
        Err(FsError::NotImplemented("read_directory"))
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Create a symbolic link at `link` pointing to `target`.
    fn create_link(&mut self, target: &str, link: &str) -> FsResult<()> {
        let _ = (target, link);
        Err(FsError::NotImplemented("create_link"))
    }

    /// Read a symbolic link's target.
    ///
    /// Fails `MalformedLink` if the target escapes this backend's namespace.
    fn read_link(&self, path: &str) -> FsResult<String> {
        let _ = path;
        Err(FsError::NotImplemented("read_link"))
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Remove a file, link, or empty directory.
    fn remove(&mut self, path: &str) -> FsResult<()> {
        let _ = path;
        Err(FsError::NotImplemented("remove"))
    }

    /// Remove `path` and everything below it.
    fn remove_recursive(&mut self, path: &str) -> FsResult<()> {
        let _ = path;
        Err(FsError::NotImplemented("remove_recursive"))
    }

    /// Move `from` to `to`.
    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let _ = (from, to);
        Err(FsError::NotImplemented("rename"))
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn read_metadata(&self, path: &str) -> FsResult<Metadata> {
        let _ = path;
        Err(FsError::NotImplemented("read_metadata"))
    }

    fn set_owner(&mut self, path: &str, user: &str, group: &str) -> FsResult<()> {
        let _ = (path, user, group);
        Err(FsError::NotImplemented("set_owner"))
    }

    fn set_mode(&mut self, path: &str, modes: Modes) -> FsResult<()> {
        let _ = (path, modes);
        Err(FsError::NotImplemented("set_mode"))
    }

    fn stat_fs(&self) -> FsResult<StatFs> {
        Err(FsError::NotImplemented("stat_fs"))
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &str) -> bool {
        self.read_metadata(path).is_ok()
    }

    /// Open `path`, read until end of data, and close it again.
    fn read_all(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let fh = self.open_file(path, false)?;
        let result = read_to_end(self, &fh);
        let closed = self.close_file(&fh);
        let data = result?;
        closed?;
        Ok(data)
    }
}

fn read_to_end<F: FileSystem + ?Sized>(fs: &mut F, fh: &FileHandle) -> FsResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = fs.read_file(fh, data.len() as u64, &mut chunk)?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

impl<F: FileSystem + ?Sized> FileSystem for Box<F> {
    fn host_id(&self) -> HostId {
        (**self).host_id()
    }

    fn create_file(&mut self, md: &Metadata, request_write: bool) -> FsResult<FileHandle> {
        (**self).create_file(md, request_write)
    }

    fn open_file(&mut self, path: &str, request_write: bool) -> FsResult<FileHandle> {
        (**self).open_file(path, request_write)
    }

    fn close_file(&mut self, fh: &FileHandle) -> FsResult<()> {
        (**self).close_file(fh)
    }

    fn read_file(&mut self, fh: &FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        (**self).read_file(fh, offset, buf)
    }

    fn write_file(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        (**self).write_file(fh, data, offset)
    }

    fn resize_file(&mut self, path: &str, size: u64) -> FsResult<()> {
        (**self).resize_file(path, size)
    }

    fn create_directory(&mut self, path: &str, md: &Metadata) -> FsResult<()> {
        (**self).create_directory(path, md)
    }

    fn read_directory(&self, path: &str) -> FsResult<Vec<Metadata>> {
        (**self).read_directory(path)
    }

    fn create_link(&mut self, target: &str, link: &str) -> FsResult<()> {
        (**self).create_link(target, link)
    }

    fn read_link(&self, path: &str) -> FsResult<String> {
        (**self).read_link(path)
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        (**self).remove(path)
    }

    fn remove_recursive(&mut self, path: &str) -> FsResult<()> {
        (**self).remove_recursive(path)
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        (**self).rename(from, to)
    }

    fn read_metadata(&self, path: &str) -> FsResult<Metadata> {
        (**self).read_metadata(path)
    }

    fn set_owner(&mut self, path: &str, user: &str, group: &str) -> FsResult<()> {
        (**self).set_owner(path, user, group)
    }

    fn set_mode(&mut self, path: &str, modes: Modes) -> FsResult<()> {
        (**self).set_mode(path, modes)
    }

    fn stat_fs(&self) -> FsResult<StatFs> {
        (**self).stat_fs()
    }
}
