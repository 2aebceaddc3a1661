use std::collections::BTreeMap;

use vfs_ipc::Endpoint;
use vfs_proto::{FsIndex, NodeKind, ServiceId};

/// Marker left on a directory node that has a child filesystem mounted on
/// it. The endpoint is the connection spliced in by the broker during MOUNT;
/// it is how this server reaches the child directly (MOUNTED on mount,
/// UNMOUNTED on unmount).
pub(crate) struct MountMarker {
    pub(crate) child_service: ServiceId,
    pub(crate) child: Endpoint,
}

pub(crate) enum MemNodeKind {
    File { data: Vec<u8> },
    Dir { children: BTreeMap<String, FsIndex> },
}

pub(crate) struct MemNode {
    pub(crate) index: FsIndex,
    pub(crate) kind: MemNodeKind,
    pub(crate) links: u32,
    pub(crate) open_count: u32,
    pub(crate) mount: Option<MountMarker>,
}

impl MemNode {
    pub(crate) fn new_dir(index: FsIndex) -> Self {
        MemNode {
            index,
            kind: MemNodeKind::Dir {
                children: BTreeMap::new(),
            },
            links: 1,
            open_count: 0,
            mount: None,
        }
    }

    pub(crate) fn new_file(index: FsIndex) -> Self {
        MemNode {
            index,
            kind: MemNodeKind::File { data: Vec::new() },
            links: 1,
            open_count: 0,
            mount: None,
        }
    }

    pub(crate) fn node_kind(&self) -> NodeKind {
        match self.kind {
            MemNodeKind::File { .. } => NodeKind::File,
            MemNodeKind::Dir { .. } => NodeKind::Directory,
        }
    }

    /// Size as reported to the broker: bytes for files, entry count for
    /// directories.
    pub(crate) fn size(&self) -> u64 {
        match &self.kind {
            MemNodeKind::File { data } => data.len() as u64,
            MemNodeKind::Dir { children } => children.len() as u64,
        }
    }

    pub(crate) fn children(&self) -> Option<&BTreeMap<String, FsIndex>> {
        match &self.kind {
            MemNodeKind::Dir { children } => Some(children),
            MemNodeKind::File { .. } => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut BTreeMap<String, FsIndex>> {
        match &mut self.kind {
            MemNodeKind::Dir { children } => Some(children),
            MemNodeKind::File { .. } => None,
        }
    }
}
