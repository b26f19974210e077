//! # plexfs-kernel
//!
//! Capability-oriented virtual filesystem.
//!
//! Everything is a path. A path may hold ordinary bytes, a directory, a
//! link, or a [`Module`](vfs::Module) that computes its contents on every
//! access. Modules decide for themselves whether all openers share one
//! state or each opener gets its own, which is how request/response
//! endpoints such as `/net/resolve` work.
//!
//! - [`vfs`] - The contract, the error taxonomy and both backends
//! - [`modules`] - Stock modules: byte buffers, the clock, query
//!   endpoints, controller-guarded device state
//! - [`SharedFs`] / [`FsWorker`] - Sharing one backend between threads
//!   and driving it from async code
//! - [`bridge`] - Translation into a filesystem driver's vocabulary

#[cfg(unix)]
pub mod bridge;
pub mod modules;
mod shared;
pub mod vfs;
mod worker;

pub use shared::SharedFs;
pub use worker::FsWorker;

#[cfg(unix)]
pub use vfs::PosixBackend;
pub use vfs::{
    FileHandle, FileSystem, FileType, FsError, FsResult, HostId, Metadata, Modes, Module,
    TreeBackend,
};
