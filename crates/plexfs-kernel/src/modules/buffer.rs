//! Plain byte-buffer file.

use crate::vfs::module::{read_slice, Module};
use crate::vfs::{FileHandle, FsError, FsResult};

/// An ordinary file: one buffer shared by every handle.
#[derive(Debug, Clone, Default)]
pub struct BufferFile {
    data: Vec<u8>,
}

impl BufferFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file that starts out holding `contents`.
    pub fn with_contents(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            data: contents.into(),
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Grow to `len` bytes, zero-filling. Never shrinks.
    fn grow(&mut self, len: usize) -> FsResult<()> {
        if len > self.data.len() {
            self.data
                .try_reserve(len - self.data.len())
                .map_err(|_| FsError::MemoryError)?;
            self.data.resize(len, 0);
        }
        Ok(())
    }
}

impl Module for BufferFile {
    fn read(&mut self, _fh: &FileHandle, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        Ok(read_slice(&self.data, buf, offset))
    }

    fn write(&mut self, _fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        let start = usize::try_from(offset).map_err(|_| FsError::OutOfRange)?;
        let end = start.checked_add(data.len()).ok_or(FsError::OutOfRange)?;
        self.grow(end)?;
        self.data[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn resize(&mut self, size: u64) -> FsResult<()> {
        let size = usize::try_from(size).map_err(|_| FsError::OutOfRange)?;
        if size < self.data.len() {
            self.data.truncate(size);
            Ok(())
        } else {
            self.grow(size)
        }
    }
}
