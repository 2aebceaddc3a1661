//! Mount table.
//!
//! Tracks mounted subtrees. Overlay lookup happens in the resolver: when a
//! backend reports a crossing at a mount-point triplet, [`MountTable::cross`]
//! yields the mounted root to continue in.

use std::collections::HashMap;

use parking_lot::Mutex;
use vfs_proto::{CanonPathBuf, Errno, FsHandle, ServiceId, Triplet, VfsResult};

/// One mounted subtree. The root mount has `mp_triplet: None` and the
/// mount-point path `/`.
#[derive(Clone, Debug)]
pub struct MtabEntry {
    pub mount_point: CanonPathBuf,
    pub mp_triplet: Option<Triplet>,
    pub root_triplet: Triplet,
    pub fs_handle: FsHandle,
    pub service_id: ServiceId,
    pub instance: u32,
    pub fs_name: String,
    pub opts: String,
}

struct MountsInner {
    entries: Vec<MtabEntry>,
    by_mp_triplet: HashMap<Triplet, Triplet>,
}

pub struct MountTable {
    inner: Mutex<MountsInner>,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    pub fn new() -> Self {
        MountTable {
            inner: Mutex::new(MountsInner {
                entries: Vec::new(),
                by_mp_triplet: HashMap::new(),
            }),
        }
    }

    /// Record a mount. Mount-point paths are unique, and a triplet may be
    /// the mount point of at most one child.
    pub fn insert(&self, entry: MtabEntry) -> VfsResult<()> {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .iter()
            .any(|existing| existing.mount_point == entry.mount_point)
        {
            return Err(Errno::Busy);
        }
        if let Some(mp) = entry.mp_triplet {
            if inner.by_mp_triplet.contains_key(&mp) {
                return Err(Errno::Busy);
            }
            inner.by_mp_triplet.insert(mp, entry.root_triplet);
        }
        inner.entries.push(entry);
        Ok(())
    }

    pub fn remove(&self, mount_point: &CanonPathBuf) -> Option<MtabEntry> {
        let mut inner = self.inner.lock();
        let at = inner
            .entries
            .iter()
            .position(|entry| &entry.mount_point == mount_point)?;
        let entry = inner.entries.remove(at);
        if let Some(mp) = entry.mp_triplet {
            inner.by_mp_triplet.remove(&mp);
        }
        Some(entry)
    }

    /// Overlay lookup: the mounted root overlaid on a mount-point triplet.
    pub fn cross(&self, mp: &Triplet) -> Option<Triplet> {
        self.inner.lock().by_mp_triplet.get(mp).copied()
    }

    /// Whether a mount-point path is still free.
    pub fn mount_point_free(&self, mount_point: &CanonPathBuf) -> bool {
        !self
            .inner
            .lock()
            .entries
            .iter()
            .any(|entry| &entry.mount_point == mount_point)
    }

    pub fn snapshot(&self) -> Vec<MtabEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
