//! Per-client descriptor table.
//!
//! A slot vector with lowest-free allocation. Every descriptor operation
//! goes through the descriptor's own mutex, so reads, writes and seeks on
//! one fd serialize while different fds proceed in parallel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use vfs_proto::{Errno, OpenMode, VfsResult};

use crate::node::VfsNode;

/// Ceiling on descriptor numbers per client.
const MAX_FILES: usize = 1024;

/// Mutable descriptor state, guarded by the per-descriptor mutex.
#[derive(Debug)]
pub struct FileState {
    pub pos: u64,
    pub open_read: bool,
    pub open_write: bool,
    pub append: bool,
}

/// One open-file record. `permissions` is fixed at walk time and bounds the
/// mode bits a later open may set. A descriptor slot holds one reference on
/// the node in the node cache.
#[derive(Debug)]
pub struct VfsFile {
    pub node: Arc<VfsNode>,
    pub permissions: OpenMode,
    pub state: AsyncMutex<FileState>,
}

impl VfsFile {
    pub fn new(node: Arc<VfsNode>, permissions: OpenMode) -> Arc<Self> {
        Arc::new(VfsFile {
            node,
            permissions,
            state: AsyncMutex::new(FileState {
                pos: 0,
                open_read: false,
                open_write: false,
                append: false,
            }),
        })
    }
}

struct FileTableInner {
    files: Vec<Option<Arc<VfsFile>>>,
    first_free: Option<usize>,
}

pub struct FileTable {
    inner: Mutex<FileTableInner>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        FileTable {
            inner: Mutex::new(FileTableInner {
                files: Vec::new(),
                first_free: None,
            }),
        }
    }

    /// Bind a descriptor to the lowest free slot.
    pub fn alloc(&self, file: Arc<VfsFile>) -> VfsResult<u64> {
        let mut inner = self.inner.lock();
        match inner.first_free {
            Some(free) => {
                inner.files[free] = Some(file);
                inner.first_free = inner.first_free_after(free + 1);
                Ok(free as u64)
            }
            None => {
                if inner.files.len() >= MAX_FILES {
                    return Err(Errno::NoMemory);
                }
                inner.files.push(Some(file));
                Ok((inner.files.len() - 1) as u64)
            }
        }
    }

    /// Bind an existing descriptor to a chosen slot (dup). The slot must be
    /// free.
    pub fn assign(&self, file: Arc<VfsFile>, fd: u64) -> VfsResult<()> {
        let fd = fd as usize;
        if fd >= MAX_FILES {
            return Err(Errno::BadFd);
        }
        let mut inner = self.inner.lock();
        if inner.files.len() <= fd {
            if inner.first_free.is_none() && fd > inner.files.len() {
                inner.first_free = Some(inner.files.len());
            }
            inner.files.resize(fd + 1, None);
        }
        if inner.files[fd].is_some() {
            return Err(Errno::Busy);
        }
        inner.files[fd] = Some(file);
        if inner.first_free == Some(fd) {
            inner.first_free = inner.first_free_after(fd + 1);
        }
        Ok(())
    }

    pub fn get(&self, fd: u64) -> VfsResult<Arc<VfsFile>> {
        let fd = usize::try_from(fd).map_err(|_| Errno::BadFd)?;
        self.inner
            .lock()
            .files
            .get(fd)
            .and_then(|slot| slot.clone())
            .ok_or(Errno::BadFd)
    }

    /// Clear a slot, returning the descriptor so the caller can release the
    /// slot's node reference.
    pub fn free(&self, fd: u64) -> VfsResult<Arc<VfsFile>> {
        let fd = usize::try_from(fd).map_err(|_| Errno::BadFd)?;
        let mut inner = self.inner.lock();
        let file = inner
            .files
            .get_mut(fd)
            .and_then(|slot| slot.take())
            .ok_or(Errno::BadFd)?;
        match inner.first_free {
            None => inner.first_free = Some(fd),
            Some(free) if free > fd => inner.first_free = Some(fd),
            _ => {}
        }
        Ok(file)
    }
}

impl FileTableInner {
    fn first_free_after(&self, from: usize) -> Option<usize> {
        self.files
            .iter()
            .skip(from)
            .position(|slot| slot.is_none())
            .map(|offset| offset + from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeCache;
    use crate::registry::FsRegistry;
    use vfs_proto::{FsHandle, FsIndex, LookupResult, NodeKind, ServiceId, Triplet};

    fn file(cache: &NodeCache, index: u64) -> Arc<VfsFile> {
        let node = cache.get(&LookupResult {
            triplet: Triplet {
                fs_handle: FsHandle::new(1).expect("handle"),
                service_id: ServiceId(1),
                index: FsIndex(index),
            },
            size: 0,
            kind: NodeKind::File,
        });
        VfsFile::new(node, OpenMode::all())
    }

    #[test]
    fn alloc_returns_the_lowest_free_slot() {
        let cache = NodeCache::new(Arc::new(FsRegistry::new()));
        let table = FileTable::new();
        assert_eq!(table.alloc(file(&cache, 1)).expect("fd 0"), 0);
        assert_eq!(table.alloc(file(&cache, 2)).expect("fd 1"), 1);
        assert_eq!(table.alloc(file(&cache, 3)).expect("fd 2"), 2);
        table.free(1).expect("free");
        assert_eq!(table.alloc(file(&cache, 4)).expect("reuse"), 1);
        assert_eq!(table.alloc(file(&cache, 5)).expect("next"), 3);
    }

    #[test]
    fn assign_into_a_held_slot_is_refused() {
        let cache = NodeCache::new(Arc::new(FsRegistry::new()));
        let table = FileTable::new();
        let fd = table.alloc(file(&cache, 1)).expect("fd");
        let err = table.assign(file(&cache, 2), fd).expect_err("held");
        assert_eq!(err, Errno::Busy);
    }

    #[test]
    fn assign_beyond_the_end_grows_the_table() {
        let cache = NodeCache::new(Arc::new(FsRegistry::new()));
        let table = FileTable::new();
        table.assign(file(&cache, 1), 5).expect("assign");
        table.get(5).expect("get");
        // Slots skipped by the resize are still allocatable.
        assert_eq!(table.alloc(file(&cache, 2)).expect("fd"), 0);
    }

    #[test]
    fn freed_and_unknown_fds_are_bad() {
        let cache = NodeCache::new(Arc::new(FsRegistry::new()));
        let table = FileTable::new();
        let fd = table.alloc(file(&cache, 1)).expect("fd");
        table.free(fd).expect("free");
        assert_eq!(table.get(fd).expect_err("freed"), Errno::BadFd);
        assert_eq!(table.free(fd).expect_err("double free"), Errno::BadFd);
        assert_eq!(table.get(99).expect_err("never allocated"), Errno::BadFd);
    }
}
