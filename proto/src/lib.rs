//! Wire vocabulary for the VFS broker.
//!
//! Everything that crosses a channel boundary lives here: node identities,
//! status codes, flag sets, method codes and the 32-bit word plumbing used to
//! carry 64-bit quantities over narrow argument slots. Both the broker and
//! backend servers depend on this crate and nothing else in the workspace.

mod args;
mod canon;
mod error;
mod flags;
mod ids;
mod method;

pub use args::{
    decode_lookup_reply, encode_lookup_reply, lower32, merge_i64, merge_loup32, split_i64,
    upper32, LookupReply,
};
pub use canon::{canonify, CanonPathBuf};
pub use error::{Errno, VfsResult};
pub use flags::{walk_lookup_flags, LookupFlags, OpenMode, SeekWhence, WalkFlags};
pub use ids::{FsHandle, FsIndex, FsInfo, LookupResult, NodeKind, NodeStat, ServiceId, Triplet};
pub use method::{BackendMethod, ClientMethod};

/// Sentinel for "no file descriptor" in client requests (`parent_fd = -1`).
pub const FD_NONE: u64 = u64::MAX;
