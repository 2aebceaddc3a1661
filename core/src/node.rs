//! Node cache.
//!
//! Interns backend nodes by triplet: at most one live [`VfsNode`] exists per
//! triplet at any moment. Reference counts live next to the interned entry,
//! under the same mutex, so [`NodeCache::refcount_sum`] is exact at any
//! quiescent instant.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use vfs_proto::{BackendMethod, FsHandle, LookupResult, NodeKind, ServiceId, Triplet, VfsResult};

use crate::registry::FsRegistry;

/// Cached state guarded by the per-node contents rwlock: readers of the size
/// share it, content-mutating operations take it exclusively.
#[derive(Debug)]
pub struct NodeContent {
    pub size: u64,
}

/// The broker's in-memory handle for one triplet.
#[derive(Debug)]
pub struct VfsNode {
    pub triplet: Triplet,
    pub kind: NodeKind,
    pub contents: RwLock<NodeContent>,
}

struct CacheSlot {
    node: Arc<VfsNode>,
    refs: usize,
}

pub struct NodeCache {
    registry: Arc<FsRegistry>,
    nodes: Mutex<HashMap<Triplet, CacheSlot>>,
}

impl NodeCache {
    pub fn new(registry: Arc<FsRegistry>) -> Self {
        NodeCache {
            registry,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Intern a lookup result: returns the existing node with one more
    /// reference, or installs a fresh node carrying one reference and the
    /// backend-reported size and type.
    pub fn get(&self, result: &LookupResult) -> Arc<VfsNode> {
        let mut nodes = self.nodes.lock();
        if let Some(slot) = nodes.get_mut(&result.triplet) {
            slot.refs += 1;
            return slot.node.clone();
        }
        let node = Arc::new(VfsNode {
            triplet: result.triplet,
            kind: result.kind,
            contents: RwLock::new(NodeContent { size: result.size }),
        });
        nodes.insert(
            result.triplet,
            CacheSlot {
                node: node.clone(),
                refs: 1,
            },
        );
        node
    }

    /// Take one more reference on an already-interned node (dup).
    pub fn retain(&self, node: &Arc<VfsNode>) {
        let mut nodes = self.nodes.lock();
        match nodes.get_mut(&node.triplet) {
            Some(slot) => slot.refs += 1,
            None => tracing::warn!(?node.triplet, "retain on evicted node"),
        }
    }

    /// Drop one reference. At zero the node leaves the cache and the backend
    /// is told to DESTROY the triplet. The reply is not awaited; the send
    /// itself is ordered after the last user on the backend connection.
    pub async fn put(&self, node: Arc<VfsNode>) {
        let evicted = {
            let mut nodes = self.nodes.lock();
            match nodes.get_mut(&node.triplet) {
                Some(slot) => {
                    slot.refs -= 1;
                    if slot.refs == 0 {
                        nodes.remove(&node.triplet);
                        true
                    } else {
                        false
                    }
                }
                None => {
                    tracing::warn!(?node.triplet, "put on evicted node");
                    false
                }
            }
        };
        if evicted {
            if let Err(errno) = self.send_destroy(&node).await {
                tracing::warn!(?node.triplet, %errno, "destroy not delivered");
            }
        }
    }

    async fn send_destroy(&self, node: &Arc<VfsNode>) -> VfsResult<()> {
        let conn = self.registry.by_handle(node.triplet.fs_handle)?;
        let exch = conn.pool.grab().await?;
        // Fire and forget: the pending reply is dropped, not awaited.
        let _ = exch
            .send(
                BackendMethod::Destroy as u32,
                [node.triplet.service_id.0, node.triplet.index.0, 0, 0],
            )
            .await?;
        Ok(())
    }

    /// Remove a node from the cache without notifying the backend. Used only
    /// when the backend was already told to tear the whole subtree down.
    pub fn forget(&self, node: &Arc<VfsNode>) {
        self.nodes.lock().remove(&node.triplet);
    }

    /// Sum of the reference counts of every cached node of one mounted
    /// filesystem. An unmountable subtree sums to exactly 2: the mount
    /// reference plus the reference the unmount check itself just took.
    pub fn refcount_sum(&self, fs_handle: FsHandle, service_id: ServiceId) -> usize {
        self.nodes
            .lock()
            .iter()
            .filter(|(triplet, _)| {
                triplet.fs_handle == fs_handle && triplet.service_id == service_id
            })
            .map(|(_, slot)| slot.refs)
            .sum()
    }

    /// Current reference count of one triplet (test support).
    pub fn refs(&self, triplet: &Triplet) -> usize {
        self.nodes
            .lock()
            .get(triplet)
            .map(|slot| slot.refs)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs_proto::FsIndex;

    fn cache() -> NodeCache {
        NodeCache::new(Arc::new(FsRegistry::new()))
    }

    fn result(index: u64) -> LookupResult {
        LookupResult {
            triplet: Triplet {
                fs_handle: FsHandle::new(1).expect("handle"),
                service_id: ServiceId(7),
                index: FsIndex(index),
            },
            size: 10,
            kind: NodeKind::File,
        }
    }

    #[tokio::test]
    async fn one_node_per_triplet() {
        let cache = cache();
        let a = cache.get(&result(1));
        let b = cache.get(&result(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.refs(&a.triplet), 2);
    }

    #[tokio::test]
    async fn put_to_zero_evicts() {
        let cache = cache();
        let node = cache.get(&result(1));
        let triplet = node.triplet;
        cache.put(node).await;
        assert_eq!(cache.refs(&triplet), 0);
        // Re-interning creates a fresh entry with one reference.
        let again = cache.get(&result(1));
        assert_eq!(cache.refs(&again.triplet), 1);
    }

    #[tokio::test]
    async fn forget_skips_the_backend() {
        let cache = cache();
        let node = cache.get(&result(1));
        cache.forget(&node);
        assert_eq!(cache.refs(&node.triplet), 0);
    }

    #[tokio::test]
    async fn refcount_sum_spans_the_whole_service() {
        let cache = cache();
        let a = cache.get(&result(1));
        let _b = cache.get(&result(2));
        let _a2 = cache.get(&result(1));
        assert_eq!(
            cache.refcount_sum(a.triplet.fs_handle, a.triplet.service_id),
            3
        );
        assert_eq!(
            cache.refcount_sum(a.triplet.fs_handle, ServiceId(8)),
            0
        );
    }

    #[tokio::test]
    async fn size_comes_from_the_install_time_lookup() {
        let cache = cache();
        let node = cache.get(&result(1));
        assert_eq!(node.contents.read().await.size, 10);
    }
}
