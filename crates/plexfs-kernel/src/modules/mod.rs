//! Stock modules for the tree backend.

mod buffer;
mod query;
mod state;
mod time;

pub use buffer::BufferFile;
pub use query::{QueryFile, RESOLVER_PATH};
pub use state::{Controller, StateCell, StateFile};
pub use time::{local_ctime, TimeFile, TIME_PATH};
