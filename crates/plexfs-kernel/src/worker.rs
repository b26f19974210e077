//! Async front for blocking backends.
//!
//! Contract calls may block for as long as the backend likes. `FsWorker`
//! runs each one on tokio's blocking pool so the calling task's executor
//! thread stays free.

use crate::shared::SharedFs;
use crate::vfs::{FileHandle, FileSystem, FsError, FsResult, Metadata};

/// Runs contract calls on the blocking pool.
pub struct FsWorker<F> {
    fs: SharedFs<F>,
}

impl<F> Clone for FsWorker<F> {
    fn clone(&self) -> Self {
        Self {
            fs: self.fs.clone(),
        }
    }
}

impl<F: FileSystem + 'static> FsWorker<F> {
    pub fn new(fs: SharedFs<F>) -> Self {
        Self { fs }
    }

    /// The backend this worker drives.
    pub fn shared(&self) -> &SharedFs<F> {
        &self.fs
    }

    /// Run `op` against the backend on the blocking pool.
    pub async fn call<R, Op>(&self, op: Op) -> FsResult<R>
    where
        R: Send + 'static,
        Op: FnOnce(&mut F) -> FsResult<R> + Send + 'static,
    {
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || fs.with(op))
            .await
            .map_err(|e| FsError::other(format!("spawn_blocking: {e}")))?
    }

    pub async fn read_metadata(&self, path: impl Into<String>) -> FsResult<Metadata> {
        let path = path.into();
        self.call(move |fs| fs.read_metadata(&path)).await
    }

    pub async fn read_directory(&self, path: impl Into<String>) -> FsResult<Vec<Metadata>> {
        let path = path.into();
        self.call(move |fs| fs.read_directory(&path)).await
    }

    pub async fn open_file(&self, path: impl Into<String>, request_write: bool) -> FsResult<FileHandle> {
        let path = path.into();
        self.call(move |fs| fs.open_file(&path, request_write)).await
    }

    pub async fn create_file(&self, md: Metadata, request_write: bool) -> FsResult<FileHandle> {
        self.call(move |fs| fs.create_file(&md, request_write)).await
    }

    /// Read up to `len` bytes at `offset`.
    pub async fn read_file(&self, fh: FileHandle, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        self.call(move |fs| {
            let mut buf = vec![0u8; len];
            let n = fs.read_file(&fh, offset, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    pub async fn write_file(&self, fh: FileHandle, data: Vec<u8>, offset: u64) -> FsResult<usize> {
        self.call(move |fs| fs.write_file(&fh, &data, offset)).await
    }

    pub async fn close_file(&self, fh: FileHandle) -> FsResult<()> {
        self.call(move |fs| fs.close_file(&fh)).await
    }

    pub async fn read_all(&self, path: impl Into<String>) -> FsResult<Vec<u8>> {
        let path = path.into();
        self.call(move |fs| fs.read_all(&path)).await
    }

    pub async fn resize_file(&self, path: impl Into<String>, size: u64) -> FsResult<()> {
        let path = path.into();
        self.call(move |fs| fs.resize_file(&path, size)).await
    }

    pub async fn remove(&self, path: impl Into<String>) -> FsResult<()> {
        let path = path.into();
        self.call(move |fs| fs.remove(&path)).await
    }
}
