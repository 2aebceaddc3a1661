//! Path resolver.
//!
//! Walks canonical paths across the namespace. Each hop sends one LOOKUP to
//! the backend owning the current triplet; a crossing reply switches to the
//! mounted child via the mount table and reissues the walk with the
//! remainder of the path. Symbolic links are a backend matter; the broker
//! only composes hops.

use std::sync::Arc;

use vfs_proto::{
    decode_lookup_reply, BackendMethod, Errno, FsIndex, LookupFlags, LookupReply, LookupResult,
    Triplet, VfsResult,
};

use crate::mount::MountTable;
use crate::registry::FsRegistry;

/// Hop bound: a namespace deeper than this in mounts is assumed cyclic.
const MAX_CROSSINGS: usize = 64;

pub(crate) struct Resolver<'a> {
    registry: &'a Arc<FsRegistry>,
    mounts: &'a MountTable,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(registry: &'a Arc<FsRegistry>, mounts: &'a MountTable) -> Self {
        Resolver { registry, mounts }
    }

    /// Resolve `path` (canonical, no leading separator) from `base`.
    pub(crate) async fn lookup(
        &self,
        base: Triplet,
        path: &str,
        flags: LookupFlags,
    ) -> VfsResult<LookupResult> {
        self.lookup_with_target(base, path, flags, None).await
    }

    /// Link `target` under the terminal name of `path`, resolved from `base`.
    /// Returns the linked node, the way an ordinary lookup would. Only used
    /// by rename, so overlays stay out of the walk.
    pub(crate) async fn link(
        &self,
        base: Triplet,
        path: &str,
        target: FsIndex,
    ) -> VfsResult<LookupResult> {
        self.lookup_with_target(base, path, LookupFlags::DISABLE_MOUNTS, Some(target))
            .await
    }

    async fn lookup_with_target(
        &self,
        base: Triplet,
        path: &str,
        flags: LookupFlags,
        link_target: Option<FsIndex>,
    ) -> VfsResult<LookupResult> {
        let mut cur = base;
        let mut rest = path.trim_start_matches('/');
        for _ in 0..MAX_CROSSINGS {
            let conn = self.registry.by_handle(cur.fs_handle)?;
            let exch = conn.pool.grab().await?;
            let (method, args) = match link_target {
                Some(target) => (
                    BackendMethod::Link,
                    [
                        cur.service_id.0,
                        cur.index.0,
                        target.0,
                        u64::from(flags.bits()),
                    ],
                ),
                None => (
                    BackendMethod::Lookup,
                    [cur.service_id.0, cur.index.0, u64::from(flags.bits()), 0],
                ),
            };
            let reply = exch
                .call_with_data(method as u32, args, rest.as_bytes().to_vec())
                .await?;
            let args = reply.result()?;
            match decode_lookup_reply(args)? {
                LookupReply::Terminal { index, size, kind } => {
                    return Ok(LookupResult {
                        triplet: Triplet {
                            fs_handle: cur.fs_handle,
                            service_id: cur.service_id,
                            index,
                        },
                        size,
                        kind,
                    });
                }
                LookupReply::Crossing { mp_index, consumed } => {
                    let mp = Triplet {
                        fs_handle: cur.fs_handle,
                        service_id: cur.service_id,
                        index: mp_index,
                    };
                    // The name must not cross into a child when it is about
                    // to be removed; backends refuse that themselves, so a
                    // crossing here means the terminal was not the target.
                    cur = self.mounts.cross(&mp).ok_or(Errno::NoEntry)?;
                    let consumed = consumed as usize;
                    if consumed > rest.len() {
                        return Err(Errno::Io);
                    }
                    rest = &rest[consumed..];
                    tracing::trace!(?mp, ?cur, rest, "mount crossing");
                }
            }
        }
        Err(Errno::NoEntry)
    }
}
