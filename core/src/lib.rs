//! The VFS broker core.
//!
//! The broker sits between client processes and backend filesystem servers.
//! Clients address paths and file descriptors; the broker resolves names
//! across the mount namespace, interns backend nodes, multiplexes
//! descriptors and forwards the residual data operations to the right
//! backend. It owns no on-disk state: only the namespace graph, per-client
//! descriptor tables and the connection fabric.
//!
//! Concurrency model: every client request is one tokio task. All blocking
//! primitives are task-aware, and the lock order is fixed:
//!
//! 1. namespace rwlock (single)
//! 2. mount-table mutex (single)
//! 3. backend-registry mutex (single)
//! 4. descriptor mutex (per descriptor)
//! 5. node contents rwlock (per node)
//!
//! Locks are held across backend IPC only where the backend cannot re-enter
//! the broker on a path that needs the same lock.

mod client;
mod config;
mod file;
mod lookup;
mod mount;
mod mtab;
mod node;
mod ops;
mod registry;
mod session;

pub use client::{MtabRecord, VfsClient};
pub use config::{BrokerConfig, MountSpec};
pub use file::{FileTable, VfsFile};
pub use mount::{MountTable, MtabEntry};
pub use node::{NodeCache, VfsNode};
pub use ops::Broker;
pub use registry::{BackendConn, FsRegistry};
pub use session::ClientSession;
