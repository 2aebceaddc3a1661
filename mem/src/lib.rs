//! In-memory backend filesystem server.
//!
//! One [`MemFs`] serves any number of volumes (services): the broker tells it
//! to bring a volume up with MOUNTED and tears it down with UNMOUNTED. Every
//! connection minted through [`vfs_ipc::Connect`] is served by its own task,
//! all sharing the same tree state. The tree itself is plain in-memory data;
//! the interesting part is the backend protocol in `serve`.

mod fs;
mod node;
mod serve;

pub use fs::MemFs;
