//! Filesystem backends.

pub(crate) mod paths;
#[cfg(unix)]
mod posix;
mod tree;
#[cfg(unix)]
pub(crate) mod users;

#[cfg(unix)]
pub use posix::PosixBackend;
pub use tree::TreeBackend;
