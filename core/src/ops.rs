//! Operation dispatcher.
//!
//! Composes the registry, node cache, mount table, resolver and descriptor
//! tables into the client-facing operations. This module owns the locking
//! order and every compensation step; each operation releases what it
//! acquired in reverse order on every exit path.

use std::sync::Arc;

use tokio::sync::RwLock;
use vfs_proto::{
    canonify, lower32, merge_loup32, upper32, walk_lookup_flags, BackendMethod, CanonPathBuf,
    Errno, FsIndex, LookupFlags, LookupResult, NodeKind, OpenMode, SeekWhence, ServiceId, Triplet,
    VfsResult, WalkFlags, FD_NONE,
};

use crate::file::VfsFile;
use crate::lookup::Resolver;
use crate::mount::{MountTable, MtabEntry};
use crate::node::{NodeCache, VfsNode};
use crate::registry::{BackendConn, FsRegistry};
use crate::session::ClientSession;

/// Positions are reported clamped to the signed 64-bit maximum; the internal
/// position may exceed it.
const OFF64_MAX: u64 = i64::MAX as u64;

/// Bound on the parent's MOUNT reply. There are no broker timeouts on data
/// operations; this one only defends the mount protocol against a backend
/// that breaks the exchange-cloning contract.
const MOUNT_REPLY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

struct Namespace {
    root: Option<Arc<VfsNode>>,
}

/// Either lock mode of the namespace rwlock.
enum NsGuard<'a> {
    Read(tokio::sync::RwLockReadGuard<'a, Namespace>),
    Write(tokio::sync::RwLockWriteGuard<'a, Namespace>),
}

impl NsGuard<'_> {
    fn root(&self) -> Option<&Arc<VfsNode>> {
        match self {
            NsGuard::Read(guard) => guard.root.as_ref(),
            NsGuard::Write(guard) => guard.root.as_ref(),
        }
    }
}

pub struct Broker {
    namespace: RwLock<Namespace>,
    cache: NodeCache,
    mounts: MountTable,
    registry: Arc<FsRegistry>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(FsRegistry::new());
        Arc::new(Broker {
            namespace: RwLock::new(Namespace { root: None }),
            cache: NodeCache::new(registry.clone()),
            mounts: MountTable::new(),
            registry,
        })
    }

    pub fn registry(&self) -> &Arc<FsRegistry> {
        &self.registry
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Node cache introspection, for invariant checks in tests.
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.registry, &self.mounts)
    }

    // ---- mount / unmount -------------------------------------------------

    /// Mount `fs_name`/`instance` (resolved through the registry, blocking if
    /// requested) at `mount_point`. Also the startup-replay entry point.
    pub async fn mount(
        &self,
        fs_name: &str,
        instance: u32,
        blocking: bool,
        service_id: ServiceId,
        mount_point: &str,
        opts: &str,
    ) -> VfsResult<()> {
        let mp = canonify(mount_point).ok_or(Errno::Invalid)?;
        if !mp.is_absolute() {
            return Err(Errno::Invalid);
        }
        let conn = self.registry.resolve(fs_name, instance, blocking).await?;
        self.mount_with(&conn, service_id, instance, fs_name, mp, opts)
            .await
    }

    async fn mount_with(
        &self,
        conn: &Arc<BackendConn>,
        service_id: ServiceId,
        instance: u32,
        fs_name: &str,
        mp: CanonPathBuf,
        opts: &str,
    ) -> VfsResult<()> {
        // Lookups must not observe a half-installed mount, so the namespace
        // stays write-locked across the whole backend conversation.
        let mut ns = self.namespace.write().await;

        if !self.mounts.mount_point_free(&mp) {
            return Err(Errno::Busy);
        }

        let root = if let Some(root) = ns.root.as_ref() {
            root.triplet
        } else {
            // Without a root filesystem the only legal mount point is /.
            if !mp.is_root() {
                return Err(Errno::NoEntry);
            }
            let (root_index, size) = self.mount_root(conn, service_id, opts).await?;
            let root_res = LookupResult {
                triplet: Triplet {
                    fs_handle: conn.handle,
                    service_id,
                    index: root_index,
                },
                size,
                kind: NodeKind::Directory,
            };
            let root_node = self.cache.get(&root_res);
            let entry = MtabEntry {
                mount_point: mp.clone(),
                mp_triplet: None,
                root_triplet: root_res.triplet,
                fs_handle: conn.handle,
                service_id,
                instance,
                fs_name: fs_name.to_string(),
                opts: opts.to_string(),
            };
            if let Err(errno) = self.mounts.insert(entry) {
                self.cache.forget(&root_node);
                return Err(errno);
            }
            ns.root = Some(root_node);
            tracing::debug!(%mp, fs = fs_name, service = service_id.0, "root mounted");
            return Ok(());
        };

        if mp.is_root() {
            // Mounting over the root filesystem.
            return Err(Errno::Busy);
        }

        let mp_res = self
            .resolver()
            .lookup(root, mp.relative(), LookupFlags::DIRECTORY)
            .await?;
        if self.mounts.cross(&mp_res.triplet).is_some() {
            return Err(Errno::Busy);
        }

        // This reference pins the mount point; unmount releases it.
        let mp_node = self.cache.get(&mp_res);

        match self.mount_child(conn, service_id, &mp_res, opts).await {
            Ok((root_index, size)) => {
                let root_res = LookupResult {
                    triplet: Triplet {
                        fs_handle: conn.handle,
                        service_id,
                        index: root_index,
                    },
                    size,
                    kind: NodeKind::Directory,
                };
                // The mount reference on the mounted root.
                let root_node = self.cache.get(&root_res);
                let entry = MtabEntry {
                    mount_point: mp.clone(),
                    mp_triplet: Some(mp_res.triplet),
                    root_triplet: root_res.triplet,
                    fs_handle: conn.handle,
                    service_id,
                    instance,
                    fs_name: fs_name.to_string(),
                    opts: opts.to_string(),
                };
                if let Err(errno) = self.mounts.insert(entry) {
                    self.cache.put(root_node).await;
                    self.cache.put(mp_node).await;
                    return Err(errno);
                }
                tracing::debug!(%mp, fs = fs_name, service = service_id.0, "mounted");
                Ok(())
            }
            Err(errno) => {
                self.cache.put(mp_node).await;
                Err(errno)
            }
        }
    }

    async fn mount_root(
        &self,
        conn: &Arc<BackendConn>,
        service_id: ServiceId,
        opts: &str,
    ) -> VfsResult<(FsIndex, u64)> {
        let exch = conn.pool.grab().await?;
        let pending = exch
            .send(BackendMethod::Mounted as u32, [service_id.0, 0, 0, 0])
            .await?;
        exch.data_write(opts.as_bytes().to_vec()).await?;
        let args = pending.wait().await?.result()?;
        Ok((FsIndex(args[0]), merge_loup32(args[1], args[2])))
    }

    async fn mount_child(
        &self,
        conn: &Arc<BackendConn>,
        service_id: ServiceId,
        mp_res: &LookupResult,
        opts: &str,
    ) -> VfsResult<(FsIndex, u64)> {
        let parent = self.registry.by_handle(mp_res.triplet.fs_handle)?;
        let parent_exch = parent.pool.grab().await?;
        // Splice a connection to the child into the parent, so the parent
        // can bring the child up itself.
        let spliced = conn.pool.clone_connection();
        let pending = parent_exch
            .send_with_clone(
                BackendMethod::Mount as u32,
                [
                    mp_res.triplet.service_id.0,
                    mp_res.triplet.index.0,
                    u64::from(conn.handle.get()),
                    service_id.0,
                ],
                Some(spliced),
            )
            .await?;
        parent_exch.data_write(opts.as_bytes().to_vec()).await?;
        // Wait for the answer before releasing the parent exchange: the
        // parent may recursively call into the child while handling MOUNT.
        // A parent that violates the exchange-cloning contract deadlocks
        // against itself instead of replying; the timeout turns that into an
        // aborted mount.
        let reply = tokio::time::timeout(MOUNT_REPLY_TIMEOUT, pending.wait())
            .await
            .map_err(|_| Errno::Io)??;
        let args = reply.result()?;
        Ok((FsIndex(args[0]), merge_loup32(args[1], args[2])))
    }

    pub async fn unmount(&self, mount_point: &str) -> VfsResult<()> {
        let mp = canonify(mount_point).ok_or(Errno::Invalid)?;
        if !mp.is_absolute() {
            return Err(Errno::Invalid);
        }

        // The write lock stops new references: references are only ever
        // added under some namespace-locked operation.
        let mut ns = self.namespace.write().await;
        let root = ns.root.as_ref().ok_or(Errno::NoEntry)?.triplet;

        let mr_res = self
            .resolver()
            .lookup(root, mp.relative(), LookupFlags::empty())
            .await?;
        let mr_node = self.cache.get(&mr_res);

        // Expected: the mount reference plus the one just taken. Anything
        // above that means the subtree is in use.
        if self
            .cache
            .refcount_sum(mr_res.triplet.fs_handle, mr_res.triplet.service_id)
            != 2
        {
            self.cache.put(mr_node).await;
            return Err(Errno::Busy);
        }

        if mp.is_root() {
            // No mount-point node exists; tell the mounted filesystem
            // directly.
            let result = self
                .backend_call(
                    mr_res.triplet,
                    BackendMethod::Unmounted,
                    [mr_res.triplet.service_id.0, 0, 0, 0],
                )
                .await;
            if let Err(errno) = result {
                self.cache.put(mr_node).await;
                return Err(errno);
            }
            ns.root = None;
        } else {
            let mp_res = match self
                .resolver()
                .lookup(root, mp.relative(), LookupFlags::MOUNT_POINT)
                .await
            {
                Ok(res) => res,
                Err(errno) => {
                    self.cache.put(mr_node).await;
                    return Err(errno);
                }
            };
            let mp_node = self.cache.get(&mp_res);
            let result = self
                .backend_call(
                    mp_res.triplet,
                    BackendMethod::Unmount,
                    [mp_res.triplet.service_id.0, mp_res.triplet.index.0, 0, 0],
                )
                .await;
            if let Err(errno) = result {
                self.cache.put(mp_node).await;
                self.cache.put(mr_node).await;
                return Err(errno);
            }
            // Once for this call, once for the mount reference.
            self.cache.put(mp_node.clone()).await;
            self.cache.put(mp_node).await;
        }

        // The child backend already tore the subtree down; drop the root
        // without a DESTROY.
        self.cache.forget(&mr_node);
        self.mounts.remove(&mp);
        tracing::debug!(%mp, "unmounted");
        Ok(())
    }

    async fn backend_call(
        &self,
        triplet: Triplet,
        method: BackendMethod,
        args: [u64; 4],
    ) -> VfsResult<[u64; 3]> {
        let conn = self.registry.by_handle(triplet.fs_handle)?;
        let exch = conn.pool.grab().await?;
        exch.call(method as u32, args).await?.result()
    }

    // ---- descriptor operations ------------------------------------------

    pub async fn walk(
        &self,
        session: &ClientSession,
        parent_fd: u64,
        path: &str,
        raw_flags: u32,
    ) -> VfsResult<u64> {
        let flags = WalkFlags::validate(raw_flags)?;
        let path = canonify(path).ok_or(Errno::Invalid)?;
        let parent = if parent_fd == FD_NONE {
            None
        } else {
            Some(session.files().get(parent_fd)?)
        };

        // A walk that may create serializes with the other namespace
        // mutators; pure lookups run in parallel under the read mode.
        let ns = if flags.intersects(WalkFlags::MAY_CREATE | WalkFlags::MUST_CREATE) {
            NsGuard::Write(self.namespace.write().await)
        } else {
            NsGuard::Read(self.namespace.read().await)
        };
        let base = match &parent {
            Some(file) => file.node.triplet,
            None => ns.root().ok_or(Errno::NoEntry)?.triplet,
        };
        let result = self
            .resolver()
            .lookup(base, path.relative(), walk_lookup_flags(flags))
            .await?;
        let node = self.cache.get(&result);
        let permissions = parent
            .as_ref()
            .map(|file| file.permissions)
            .unwrap_or(OpenMode::all());
        match session.files().alloc(VfsFile::new(node.clone(), permissions)) {
            Ok(fd) => {
                drop(ns);
                tracing::trace!(fd, %path, "walk");
                Ok(fd)
            }
            Err(errno) => {
                drop(ns);
                self.cache.put(node).await;
                Err(errno)
            }
        }
    }

    pub async fn open2(&self, session: &ClientSession, fd: u64, raw_mode: u32) -> VfsResult<()> {
        let mode = OpenMode::from_bits(raw_mode).ok_or(Errno::Invalid)?;
        if mode.is_empty() {
            return Err(Errno::Invalid);
        }
        let file = session.files().get(fd)?;
        if !file.permissions.contains(mode) {
            return Err(Errno::NotPermitted);
        }

        let mut state = file.state.lock().await;
        let open_read = mode.contains(OpenMode::READ);
        let open_write = mode.intersects(OpenMode::WRITE | OpenMode::APPEND);
        if !open_read && !open_write {
            return Err(Errno::Invalid);
        }
        if file.node.kind == NodeKind::Directory && open_write {
            return Err(Errno::Invalid);
        }

        self.backend_call(
            file.node.triplet,
            BackendMethod::OpenNode,
            [file.node.triplet.service_id.0, file.node.triplet.index.0, 0, 0],
        )
        .await?;

        state.open_read = open_read;
        state.open_write = open_write;
        state.append = mode.contains(OpenMode::APPEND);
        Ok(())
    }

    pub async fn read(
        &self,
        session: &ClientSession,
        fd: u64,
        max: usize,
    ) -> VfsResult<(u64, Vec<u8>)> {
        let file = session.files().get(fd)?;
        // Directory enumeration must not observe namespace mutation, and the
        // namespace lock precedes the descriptor mutex in the lock order.
        // The node kind is immutable, so this needs no lock.
        let _ns = if file.node.kind == NodeKind::Directory {
            Some(self.namespace.read().await)
        } else {
            None
        };

        let mut state = file.state.lock().await;
        if !state.open_read {
            return Err(Errno::Invalid);
        }
        let conn = self.registry.by_handle(file.node.triplet.fs_handle)?;

        // Reads always share the contents lock.
        let _contents = file.node.contents.read().await;
        let exch = conn.pool.grab().await?;
        let (reply, data) = exch
            .call_read(
                BackendMethod::Read as u32,
                [
                    file.node.triplet.service_id.0,
                    file.node.triplet.index.0,
                    lower32(state.pos),
                    upper32(state.pos),
                ],
                max,
            )
            .await?;
        let args = reply.result()?;
        state.pos += args[0];
        Ok((args[0], data))
    }

    pub async fn write(
        &self,
        session: &ClientSession,
        fd: u64,
        payload: Vec<u8>,
    ) -> VfsResult<(u64, u64)> {
        let file = session.files().get(fd)?;
        let mut state = file.state.lock().await;
        if !state.open_write {
            return Err(Errno::Invalid);
        }
        let conn = self.registry.by_handle(file.node.triplet.fs_handle)?;

        // Writes take the contents lock exclusively unless the backend both
        // tolerates concurrent readers and never changes sizes on write.
        let shared = conn.info.concurrent_read_write && conn.info.write_retains_size;
        if shared {
            let contents = file.node.contents.read().await;
            if state.append {
                state.pos = contents.size;
            }
            let (written, size) = self.forward_write(&conn, &file, state.pos, payload).await?;
            state.pos += written;
            Ok((written, size))
        } else {
            let mut contents = file.node.contents.write().await;
            if state.append {
                state.pos = contents.size;
            }
            let (written, size) = self.forward_write(&conn, &file, state.pos, payload).await?;
            // Latch the new size while still holding the exclusive lock.
            contents.size = size;
            state.pos += written;
            Ok((written, size))
        }
    }

    async fn forward_write(
        &self,
        conn: &Arc<BackendConn>,
        file: &Arc<VfsFile>,
        pos: u64,
        payload: Vec<u8>,
    ) -> VfsResult<(u64, u64)> {
        let exch = conn.pool.grab().await?;
        let reply = exch
            .call_with_data(
                BackendMethod::Write as u32,
                [
                    file.node.triplet.service_id.0,
                    file.node.triplet.index.0,
                    lower32(pos),
                    upper32(pos),
                ],
                payload,
            )
            .await?;
        let args = reply.result()?;
        Ok((args[0], merge_loup32(args[1], args[2])))
    }

    pub async fn seek(
        &self,
        session: &ClientSession,
        fd: u64,
        offset: i64,
        whence: SeekWhence,
    ) -> VfsResult<u64> {
        let file = session.files().get(fd)?;
        let mut state = file.state.lock().await;
        match whence {
            SeekWhence::Set => {
                if offset < 0 {
                    return Err(Errno::Invalid);
                }
                state.pos = offset as u64;
            }
            SeekWhence::Current => {
                state.pos = seek_from(state.pos, offset)?;
            }
            SeekWhence::End => {
                let size = file.node.contents.read().await.size;
                state.pos = seek_from(size, offset)?;
            }
        }
        Ok(state.pos.min(OFF64_MAX))
    }

    pub async fn truncate(&self, session: &ClientSession, fd: u64, size: u64) -> VfsResult<()> {
        let file = session.files().get(fd)?;
        let _state = file.state.lock().await;
        let mut contents = file.node.contents.write().await;
        self.backend_call(
            file.node.triplet,
            BackendMethod::Truncate,
            [
                file.node.triplet.service_id.0,
                file.node.triplet.index.0,
                lower32(size),
                upper32(size),
            ],
        )
        .await?;
        contents.size = size;
        Ok(())
    }

    pub async fn sync(&self, session: &ClientSession, fd: u64) -> VfsResult<()> {
        let file = session.files().get(fd)?;
        let _state = file.state.lock().await;
        self.backend_call(
            file.node.triplet,
            BackendMethod::Sync,
            [file.node.triplet.service_id.0, file.node.triplet.index.0, 0, 0],
        )
        .await?;
        Ok(())
    }

    /// Pull the stat payload from the backend; the session layer forwards it
    /// into the client's read buffer.
    pub async fn fstat(&self, session: &ClientSession, fd: u64, max: usize) -> VfsResult<Vec<u8>> {
        let file = session.files().get(fd)?;
        let _state = file.state.lock().await;
        let conn = self.registry.by_handle(file.node.triplet.fs_handle)?;
        let exch = conn.pool.grab().await?;
        let (reply, data) = exch
            .call_read(
                BackendMethod::Stat as u32,
                [file.node.triplet.service_id.0, file.node.triplet.index.0, 0, 0],
                max,
            )
            .await?;
        reply.result()?;
        Ok(data)
    }

    pub async fn close(&self, session: &ClientSession, fd: u64) -> VfsResult<()> {
        let file = session.files().free(fd)?;
        self.cache.put(file.node.clone()).await;
        tracing::trace!(fd, "close");
        Ok(())
    }

    pub async fn unlink(
        &self,
        session: &ClientSession,
        parent_fd: u64,
        expect_fd: u64,
        raw_flags: u32,
        path: &str,
    ) -> VfsResult<()> {
        let flags = WalkFlags::from_bits(raw_flags).ok_or(Errno::Invalid)?;
        let lflags = if flags.contains(WalkFlags::DIRECTORY) {
            LookupFlags::DIRECTORY
        } else {
            LookupFlags::empty()
        };
        let path = canonify(path).ok_or(Errno::Invalid)?;

        let ns = self.namespace.write().await;
        let parent = if parent_fd == FD_NONE {
            None
        } else {
            Some(session.files().get(parent_fd)?)
        };
        let base = match &parent {
            Some(file) => file.node.triplet,
            None => ns.root.as_ref().ok_or(Errno::NoEntry)?.triplet,
        };

        if expect_fd != FD_NONE {
            let expect = session.files().get(expect_fd)?;
            let found = self.resolver().lookup(base, path.relative(), lflags).await?;
            if found.triplet != expect.node.triplet {
                return Err(Errno::NoEntry);
            }
        }

        let removed = self
            .resolver()
            .lookup(base, path.relative(), lflags | LookupFlags::UNLINK)
            .await?;

        // The name is already gone; get/put so that a last-link removal
        // triggers the backend DESTROY at the right moment.
        let node = self.cache.get(&removed);
        self.cache.put(node).await;
        drop(ns);
        tracing::debug!(%path, "unlinked");
        Ok(())
    }

    pub async fn rename(
        &self,
        session: &ClientSession,
        base_fd: u64,
        old: &str,
        new: &str,
    ) -> VfsResult<()> {
        let old = canonify(old).ok_or(Errno::Invalid)?;
        let new = canonify(new).ok_or(Errno::Invalid)?;
        let old = old.as_str();
        let new = new.as_str();
        // Neither path may be a prefix of the other.
        if is_path_prefix(old, new) || is_path_prefix(new, old) {
            return Err(Errno::Invalid);
        }
        let base_file = if base_fd == FD_NONE {
            None
        } else {
            Some(session.files().get(base_fd)?)
        };

        let shared = shared_prefix(old, new);

        // The write lock makes the unlink-unlink-link sequence appear atomic
        // to every other namespace operation.
        let ns = self.namespace.write().await;
        let mut base = match &base_file {
            Some(file) => file.node.triplet,
            None => ns.root.as_ref().ok_or(Errno::NoEntry)?.triplet,
        };

        let (old_rest, new_rest) = if shared != 0 {
            let prefix = trim_separators(&old[..shared]);
            let base_res = self
                .resolver()
                .lookup(base, prefix, LookupFlags::DIRECTORY)
                .await?;
            base = base_res.triplet;
            (&old[shared..], &new[shared..])
        } else {
            (old, new)
        };
        let old_rest = trim_separators(old_rest);
        let new_rest = trim_separators(new_rest);

        let resolver = self.resolver();
        let unlink = LookupFlags::UNLINK | LookupFlags::DISABLE_MOUNTS;

        // Step 1: displace whatever currently holds the new name.
        let displaced = match resolver.lookup(base, new_rest, unlink).await {
            Ok(found) => Some(found),
            Err(Errno::NoEntry) => None,
            Err(errno) => return Err(errno),
        };

        // Step 2: take the old name out.
        let moved = match resolver.lookup(base, old_rest, unlink).await {
            Ok(found) => found,
            Err(errno) => {
                if let Some(orig) = &displaced {
                    let _ = resolver.link(base, new_rest, orig.triplet.index).await;
                }
                return Err(errno);
            }
        };

        // Step 3: bind the old node under the new name.
        if let Err(errno) = resolver.link(base, new_rest, moved.triplet.index).await {
            let _ = resolver.link(base, old_rest, moved.triplet.index).await;
            if let Some(orig) = &displaced {
                let _ = resolver.link(base, new_rest, orig.triplet.index).await;
            }
            return Err(errno);
        }

        if let Some(orig) = displaced {
            // If the displaced node lost its last link, this is where the
            // backend learns about it.
            let node = self.cache.get(&orig);
            self.cache.put(node).await;
        }
        drop(ns);
        tracing::debug!(old, new, "renamed");
        Ok(())
    }

    pub async fn dup(&self, session: &ClientSession, old_fd: u64, new_fd: u64) -> VfsResult<u64> {
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        let old = session.files().get(old_fd)?;
        let _state = old.state.lock().await;

        // Make sure the target slot is closed.
        if let Ok(closed) = session.files().free(new_fd) {
            self.cache.put(closed.node.clone()).await;
        }

        // The new slot holds its own reference on the node.
        self.cache.retain(&old.node);
        if let Err(errno) = session.files().assign(old.clone(), new_fd) {
            self.cache.put(old.node.clone()).await;
            return Err(errno);
        }
        Ok(new_fd)
    }
}

fn seek_from(origin: u64, offset: i64) -> VfsResult<u64> {
    if offset >= 0 {
        let next = origin.wrapping_add(offset as u64);
        if next < origin {
            return Err(Errno::Overflow);
        }
        Ok(next)
    } else {
        let back = offset.unsigned_abs();
        if origin < back {
            return Err(Errno::Overflow);
        }
        Ok(origin - back)
    }
}

fn trim_separators(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Componentwise: is `a` a prefix of `b`?
fn is_path_prefix(a: &str, b: &str) -> bool {
    if !b.starts_with(a) {
        return false;
    }
    a == "/" || b.len() == a.len() || b.as_bytes()[a.len()] == b'/'
}

/// Byte index of the separator at which two canonical paths diverge; 0 when
/// they share no directory prefix.
fn shared_prefix(a: &str, b: &str) -> usize {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let mut at = 0;
    while at < ab.len() && at < bb.len() && ab[at] == bb[at] {
        at += 1;
    }
    if at == ab.len() && at == bb.len() {
        return at;
    }
    while at > 0 && ab[at - 1] != b'/' {
        at -= 1;
    }
    at.saturating_sub(1)
}
