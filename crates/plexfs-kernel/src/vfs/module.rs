//! Capability contract.
//!
//! A [`Module`] is the behaviour bound to a path in the
//! [`TreeBackend`](super::TreeBackend). It answers reads, writes and size
//! queries for that path.
//!
//! Modules run in one of two modes:
//!
//! - **Shared**: `open` and `close` do nothing and every handle reads and
//!   writes the same state. This is how an ordinary file behaves.
//! - **Per-open**: `open` creates state keyed by the handle and `close`
//!   drops it, so every opener gets an independent view. A write can start
//!   a request whose answer only that handle's reads will see.
//!
//! The backend drives both the same way and never knows which mode a
//! module uses.

use super::error::{FsError, FsResult};
use super::types::FileHandle;

/// Behaviour bound to one path.
pub trait Module: Send {
    /// Called once for every handle opened on the path.
    fn open(&mut self, fh: &FileHandle) -> FsResult<()> {
        let _ = fh;
        Ok(())
    }

    /// Called once when a handle is released.
    fn close(&mut self, fh: &FileHandle) -> FsResult<()> {
        let _ = fh;
        Ok(())
    }

    /// Fill `buf` from `offset`. Returns the byte count, at most `buf.len()`.
    fn read(&mut self, fh: &FileHandle, buf: &mut [u8], offset: u64) -> FsResult<usize>;

    /// Write `data` at `offset`. Returns the byte count, at most `data.len()`.
    fn write(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize>;

    /// Bytes currently available to read.
    fn size(&self) -> u64;

    /// Truncate or zero-extend the backing data.
    fn resize(&mut self, size: u64) -> FsResult<()> {
        let _ = size;
        Err(FsError::not_supported("resize"))
    }
}

/// Copy the part of `src` that starts at `offset` into `buf`.
///
/// Offsets at or past the end copy nothing.
pub fn read_slice(src: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= src.len() {
        return 0;
    }
    let n = buf.len().min(src.len() - start);
    buf[..n].copy_from_slice(&src[start..start + n]);
    n
}
