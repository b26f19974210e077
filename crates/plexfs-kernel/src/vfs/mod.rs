//! Virtual filesystem multiplexing layer.
//!
//! Key components:
//!
//! - [`FileSystem`] - The operation set every backend implements
//! - [`Module`] - Behaviour bound to a path in the tree backend
//! - [`TreeBackend`] - In-memory namespace of bound modules
//! - [`PosixBackend`] - The host filesystem under a fixed root
//! - [`HandleTable`] - Slot table both backends issue handles from
//!
//! ## Design Decisions
//!
//! - **Handles, not descriptors**: every open yields a [`FileHandle`] that
//!   names the issuing backend, so a handle presented to the wrong
//!   instance fails instead of resolving to someone else's file.
//! - **Synchronous contract**: backends block the caller. Async callers go
//!   through [`FsWorker`](crate::FsWorker).
//! - **Openness lives in the module**: whether openers share one state or
//!   each get their own is decided by the [`Module`], never by the tree.

pub mod backends;
mod error;
mod handles;
pub mod module;
mod ops;
mod types;

#[cfg(unix)]
pub use backends::PosixBackend;
pub use backends::TreeBackend;
pub use error::{FsError, FsResult};
pub use handles::HandleTable;
pub use module::Module;
pub use ops::FileSystem;
pub use types::{
    split_realm, FileHandle, FileType, HostId, Metadata, Modes, Permission, StatFs,
};
