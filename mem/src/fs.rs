use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use vfs_ipc::{channel, Connect, Endpoint};
use vfs_proto::{
    Errno, FsIndex, FsInfo, LookupFlags, LookupReply, NodeKind, NodeStat, ServiceId, VfsResult,
};

use crate::node::{MemNode, MemNodeKind, MountMarker};
use crate::serve;

const CONNECTION_DEPTH: usize = 8;

pub(crate) struct Volume {
    pub(crate) root: FsIndex,
    pub(crate) nodes: HashMap<FsIndex, MemNode>,
    pub(crate) opts: String,
}

pub(crate) struct MemState {
    pub(crate) volumes: HashMap<ServiceId, Volume>,
    next_index: u64,
}

pub(crate) struct MemInner {
    pub(crate) name: String,
    pub(crate) instance: u32,
    pub(crate) state: Mutex<MemState>,
}

/// An in-memory backend filesystem server.
#[derive(Clone)]
pub struct MemFs {
    pub(crate) inner: Arc<MemInner>,
}

impl MemFs {
    pub fn new(name: impl Into<String>, instance: u32) -> Self {
        MemFs {
            inner: Arc::new(MemInner {
                name: name.into(),
                instance,
                state: Mutex::new(MemState {
                    volumes: HashMap::new(),
                    next_index: 1,
                }),
            }),
        }
    }

    /// Registration-time description. Writes change sizes and readers are
    /// not safe against concurrent writers, so the broker must serialize.
    pub fn info(&self) -> FsInfo {
        FsInfo {
            name: self.inner.name.clone(),
            instance: self.inner.instance,
            concurrent_read_write: false,
            write_retains_size: false,
        }
    }

    /// Test introspection: does the node still exist in its volume?
    pub fn node_exists(&self, service: ServiceId, index: FsIndex) -> bool {
        self.inner
            .state
            .lock()
            .volumes
            .get(&service)
            .is_some_and(|vol| vol.nodes.contains_key(&index))
    }

    /// Test introspection: link count of a node.
    pub fn links(&self, service: ServiceId, index: FsIndex) -> Option<u32> {
        self.inner
            .state
            .lock()
            .volumes
            .get(&service)?
            .nodes
            .get(&index)
            .map(|node| node.links)
    }
}

impl Connect for MemFs {
    fn connect(&self) -> Endpoint {
        let (endpoint, listener) = channel(CONNECTION_DEPTH);
        let inner = self.inner.clone();
        tokio::spawn(serve::serve(inner, listener));
        endpoint
    }
}

impl MemState {
    fn alloc_index(&mut self) -> FsIndex {
        let index = FsIndex(self.next_index);
        self.next_index += 1;
        index
    }

    pub(crate) fn create_volume(&mut self, service: ServiceId, opts: String) -> VfsResult<(FsIndex, u64)> {
        if self.volumes.contains_key(&service) {
            return Err(Errno::Exists);
        }
        let root = self.alloc_index();
        let mut nodes = HashMap::new();
        nodes.insert(root, MemNode::new_dir(root));
        self.volumes.insert(service, Volume { root, nodes, opts });
        Ok((root, 0))
    }

    pub(crate) fn drop_volume(&mut self, service: ServiceId) -> VfsResult<()> {
        self.volumes.remove(&service).map(|_| ()).ok_or(Errno::NoEntry)
    }

    pub(crate) fn volume(&self, service: ServiceId) -> VfsResult<&Volume> {
        self.volumes.get(&service).ok_or(Errno::NoEntry)
    }

    pub(crate) fn volume_mut(&mut self, service: ServiceId) -> VfsResult<&mut Volume> {
        self.volumes.get_mut(&service).ok_or(Errno::NoEntry)
    }

    pub(crate) fn node(&self, service: ServiceId, index: FsIndex) -> VfsResult<&MemNode> {
        self.volume(service)?.nodes.get(&index).ok_or(Errno::NoEntry)
    }

    pub(crate) fn node_mut(&mut self, service: ServiceId, index: FsIndex) -> VfsResult<&mut MemNode> {
        self.volume_mut(service)?
            .nodes
            .get_mut(&index)
            .ok_or(Errno::NoEntry)
    }

    pub(crate) fn set_mount_marker(
        &mut self,
        service: ServiceId,
        index: FsIndex,
        marker: MountMarker,
    ) -> VfsResult<()> {
        let node = self.node_mut(service, index)?;
        if node.node_kind() != NodeKind::Directory {
            return Err(Errno::Invalid);
        }
        if node.mount.is_some() {
            return Err(Errno::Busy);
        }
        node.mount = Some(marker);
        Ok(())
    }

    pub(crate) fn take_mount_marker(
        &mut self,
        service: ServiceId,
        index: FsIndex,
    ) -> VfsResult<MountMarker> {
        self.node_mut(service, index)?
            .mount
            .take()
            .ok_or(Errno::NoEntry)
    }

    /// Walk `path` (canonical, no leading separator) from `base`.
    ///
    /// `link_target` carries the node index to link when `flags` contains
    /// [`LookupFlags::LINK`]. Returns either a terminal result or a crossing
    /// at a mount-point node with the count of consumed path bytes.
    pub(crate) fn lookup(
        &mut self,
        service: ServiceId,
        base: FsIndex,
        path: &str,
        flags: LookupFlags,
        link_target: Option<FsIndex>,
    ) -> VfsResult<LookupReply> {
        let overlay_active = !flags.contains(LookupFlags::DISABLE_MOUNTS);
        let components = split_components(path);

        // Empty path: the walk terminates at the base itself.
        if components.is_empty() {
            if flags.intersects(LookupFlags::UNLINK | LookupFlags::LINK) {
                return Err(Errno::Invalid);
            }
            if flags.contains(LookupFlags::CREATE) && flags.contains(LookupFlags::EXCLUSIVE) {
                return Err(Errno::Exists);
            }
            let node = self.node(service, base)?;
            check_terminal_kind(node, flags)?;
            return Ok(terminal(node));
        }

        // A walk that starts on a mount point immediately crosses into the
        // mounted child; nothing below the marker is visible.
        if overlay_active && self.node(service, base)?.mount.is_some() {
            return Ok(LookupReply::Crossing {
                mp_index: base,
                consumed: 0,
            });
        }

        // Walk down to the parent of the terminal component.
        let mut cur = base;
        for &(name, end) in &components[..components.len() - 1] {
            let node = self.node(service, cur)?;
            let children = node.children().ok_or(Errno::NoEntry)?;
            let next = *children.get(name).ok_or(Errno::NoEntry)?;
            let next_node = self.node(service, next)?;
            if overlay_active && next_node.mount.is_some() {
                return Ok(LookupReply::Crossing {
                    mp_index: next,
                    consumed: consumed_bytes(path, end),
                });
            }
            cur = next;
        }

        let (name, end) = components[components.len() - 1];

        if flags.contains(LookupFlags::LINK) {
            let target = link_target.ok_or(Errno::Invalid)?;
            return self.link_terminal(service, cur, name, target);
        }
        if flags.contains(LookupFlags::UNLINK) {
            return self.unlink_terminal(service, cur, name, flags);
        }

        let parent = self.node(service, cur)?;
        let children = parent.children().ok_or(Errno::NoEntry)?;
        match children.get(name).copied() {
            Some(found) => {
                if flags.contains(LookupFlags::CREATE) && flags.contains(LookupFlags::EXCLUSIVE) {
                    return Err(Errno::Exists);
                }
                let node = self.node(service, found)?;
                if overlay_active && node.mount.is_some() {
                    if flags.contains(LookupFlags::MOUNT_POINT) {
                        return Ok(terminal(node));
                    }
                    return Ok(LookupReply::Crossing {
                        mp_index: found,
                        consumed: consumed_bytes(path, end),
                    });
                }
                check_terminal_kind(node, flags)?;
                Ok(terminal(node))
            }
            None => {
                if !flags.contains(LookupFlags::CREATE) {
                    return Err(Errno::NoEntry);
                }
                let index = self.alloc_index();
                let node = if flags.contains(LookupFlags::DIRECTORY) {
                    MemNode::new_dir(index)
                } else {
                    MemNode::new_file(index)
                };
                let reply = terminal(&node);
                let volume = self.volume_mut(service)?;
                volume.nodes.insert(index, node);
                let parent = volume.nodes.get_mut(&cur).ok_or(Errno::NoEntry)?;
                let children = parent.children_mut().ok_or(Errno::NoEntry)?;
                children.insert(name.to_string(), index);
                Ok(reply)
            }
        }
    }

    fn link_terminal(
        &mut self,
        service: ServiceId,
        parent: FsIndex,
        name: &str,
        target: FsIndex,
    ) -> VfsResult<LookupReply> {
        let volume = self.volume_mut(service)?;
        if !volume.nodes.contains_key(&target) {
            return Err(Errno::NoEntry);
        }
        let parent_node = volume.nodes.get_mut(&parent).ok_or(Errno::NoEntry)?;
        let children = parent_node.children_mut().ok_or(Errno::NoEntry)?;
        if children.contains_key(name) {
            return Err(Errno::Exists);
        }
        children.insert(name.to_string(), target);
        let node = volume.nodes.get_mut(&target).ok_or(Errno::NoEntry)?;
        node.links += 1;
        Ok(terminal(node))
    }

    fn unlink_terminal(
        &mut self,
        service: ServiceId,
        parent: FsIndex,
        name: &str,
        flags: LookupFlags,
    ) -> VfsResult<LookupReply> {
        let volume = self.volume_mut(service)?;
        let parent_node = volume.nodes.get(&parent).ok_or(Errno::NoEntry)?;
        let children = parent_node.children().ok_or(Errno::NoEntry)?;
        let found = *children.get(name).ok_or(Errno::NoEntry)?;
        {
            let node = volume.nodes.get(&found).ok_or(Errno::NoEntry)?;
            // A name with a filesystem mounted on it cannot be unlinked.
            if node.mount.is_some() {
                return Err(Errno::Busy);
            }
            check_terminal_kind(node, flags)?;
        }
        let parent_node = volume.nodes.get_mut(&parent).ok_or(Errno::NoEntry)?;
        let children = parent_node.children_mut().ok_or(Errno::NoEntry)?;
        children.remove(name);
        let node = volume.nodes.get_mut(&found).ok_or(Errno::NoEntry)?;
        node.links = node.links.saturating_sub(1);
        Ok(terminal(node))
    }

    pub(crate) fn read(
        &self,
        service: ServiceId,
        index: FsIndex,
        pos: u64,
        max: usize,
    ) -> VfsResult<Vec<u8>> {
        let node = self.node(service, index)?;
        match &node.kind {
            MemNodeKind::File { data } => {
                let start = (pos as usize).min(data.len());
                let end = start.saturating_add(max).min(data.len());
                Ok(data[start..end].to_vec())
            }
            MemNodeKind::Dir { children } => {
                // Directory reads stream one entry name per call. The broker
                // advances the position by the bytes returned, so entries are
                // addressed by the cumulative length of the preceding names.
                let mut cum = 0u64;
                for name in children.keys() {
                    if cum == pos {
                        if name.len() > max {
                            return Err(Errno::Overflow);
                        }
                        return Ok(name.clone().into_bytes());
                    }
                    cum += name.len() as u64;
                }
                Ok(Vec::new())
            }
        }
    }

    pub(crate) fn write(
        &mut self,
        service: ServiceId,
        index: FsIndex,
        pos: u64,
        payload: &[u8],
    ) -> VfsResult<(u64, u64)> {
        let node = self.node_mut(service, index)?;
        match &mut node.kind {
            MemNodeKind::File { data } => {
                let start = pos as usize;
                let end = start.saturating_add(payload.len());
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(payload);
                Ok((payload.len() as u64, data.len() as u64))
            }
            MemNodeKind::Dir { .. } => Err(Errno::Invalid),
        }
    }

    pub(crate) fn truncate(&mut self, service: ServiceId, index: FsIndex, size: u64) -> VfsResult<()> {
        let node = self.node_mut(service, index)?;
        match &mut node.kind {
            MemNodeKind::File { data } => {
                data.resize(size as usize, 0);
                Ok(())
            }
            MemNodeKind::Dir { .. } => Err(Errno::Invalid),
        }
    }

    pub(crate) fn stat(&self, service: ServiceId, index: FsIndex) -> VfsResult<NodeStat> {
        let node = self.node(service, index)?;
        Ok(NodeStat {
            service_id: service,
            index,
            kind: node.node_kind(),
            links: node.links,
            size: node.size(),
        })
    }

    pub(crate) fn open_node(&mut self, service: ServiceId, index: FsIndex) -> VfsResult<()> {
        let node = self.node_mut(service, index)?;
        node.open_count += 1;
        Ok(())
    }

    /// The broker dropped its last reference. The node only dies when no
    /// directory entry points at it anymore.
    pub(crate) fn destroy(&mut self, service: ServiceId, index: FsIndex) -> VfsResult<()> {
        let volume = self.volume_mut(service)?;
        if volume.root == index {
            return Err(Errno::Busy);
        }
        let node = volume.nodes.get(&index).ok_or(Errno::NoEntry)?;
        if node.links == 0 {
            volume.nodes.remove(&index);
        }
        Ok(())
    }
}

fn terminal(node: &MemNode) -> LookupReply {
    LookupReply::Terminal {
        index: node.index,
        size: node.size(),
        kind: node.node_kind(),
    }
}

fn check_terminal_kind(node: &MemNode, flags: LookupFlags) -> VfsResult<()> {
    if flags.contains(LookupFlags::DIRECTORY) && node.node_kind() != NodeKind::Directory {
        return Err(Errno::NoEntry);
    }
    if flags.contains(LookupFlags::FILE) && node.node_kind() != NodeKind::File {
        return Err(Errno::NoEntry);
    }
    Ok(())
}

/// Split a canonical relative path into `(component, end_byte_offset)` pairs.
fn split_components(path: &str) -> Vec<(&str, usize)> {
    let mut out = Vec::new();
    let mut offset = 0;
    for component in path.split('/') {
        let end = offset + component.len();
        if !component.is_empty() {
            out.push((component, end));
        }
        offset = end + 1;
    }
    out
}

/// Bytes of `path` consumed through the component ending at `end`, including
/// the following separator when one exists.
fn consumed_bytes(path: &str, end: usize) -> u64 {
    if path.len() > end {
        (end + 1) as u64
    } else {
        end as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_volume() -> (MemState, ServiceId, FsIndex) {
        let mut state = MemState {
            volumes: HashMap::new(),
            next_index: 1,
        };
        let service = ServiceId(7);
        let (root, _) = state.create_volume(service, String::new()).expect("volume");
        (state, service, root)
    }

    fn create_file(state: &mut MemState, service: ServiceId, path: &str) -> FsIndex {
        let root = state.volume(service).expect("volume").root;
        match state
            .lookup(
                service,
                root,
                path,
                LookupFlags::CREATE | LookupFlags::FILE,
                None,
            )
            .expect("create")
        {
            LookupReply::Terminal { index, .. } => index,
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn create_then_lookup_yields_same_index() {
        let (mut state, service, root) = state_with_volume();
        let created = create_file(&mut state, service, "a");
        match state
            .lookup(service, root, "a", LookupFlags::empty(), None)
            .expect("lookup")
        {
            LookupReply::Terminal { index, kind, .. } => {
                assert_eq!(index, created);
                assert_eq!(kind, NodeKind::File);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn exclusive_create_fails_on_existing() {
        let (mut state, service, root) = state_with_volume();
        create_file(&mut state, service, "a");
        let err = state
            .lookup(
                service,
                root,
                "a",
                LookupFlags::CREATE | LookupFlags::EXCLUSIVE | LookupFlags::FILE,
                None,
            )
            .expect_err("exclusive");
        assert_eq!(err, Errno::Exists);
    }

    #[test]
    fn unlink_removes_the_name_but_not_the_node() {
        let (mut state, service, root) = state_with_volume();
        let created = create_file(&mut state, service, "a");
        state
            .lookup(service, root, "a", LookupFlags::UNLINK, None)
            .expect("unlink");
        let err = state
            .lookup(service, root, "a", LookupFlags::empty(), None)
            .expect_err("gone");
        assert_eq!(err, Errno::NoEntry);
        // The node itself lives on until DESTROY.
        assert!(state.volume(service).expect("volume").nodes.contains_key(&created));
        assert_eq!(state.node(service, created).expect("node").links, 0);
    }

    #[test]
    fn write_extends_and_read_returns_it() {
        let (mut state, service, _root) = state_with_volume();
        let file = create_file(&mut state, service, "a");
        let (written, size) = state.write(service, file, 3, b"xyz").expect("write");
        assert_eq!((written, size), (3, 6));
        let data = state.read(service, file, 0, 16).expect("read");
        assert_eq!(data, b"\0\0\0xyz");
    }

    #[test]
    fn directory_read_streams_names_by_byte_position() {
        let (mut state, service, root) = state_with_volume();
        create_file(&mut state, service, "b");
        create_file(&mut state, service, "a");
        assert_eq!(state.read(service, root, 0, 64).expect("first"), b"a");
        assert_eq!(state.read(service, root, 1, 64).expect("second"), b"b");
        assert_eq!(state.read(service, root, 2, 64).expect("eof"), b"");
    }

    #[test]
    fn deep_path_walks_intermediate_directories() {
        let (mut state, service, root) = state_with_volume();
        state
            .lookup(
                service,
                root,
                "d",
                LookupFlags::CREATE | LookupFlags::DIRECTORY,
                None,
            )
            .expect("mkdir");
        let created = create_file(&mut state, service, "d/f");
        match state
            .lookup(service, root, "d/f", LookupFlags::empty(), None)
            .expect("lookup")
        {
            LookupReply::Terminal { index, .. } => assert_eq!(index, created),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[test]
    fn consumed_bytes_include_the_separator() {
        assert_eq!(split_components("m/x"), vec![("m", 1), ("x", 3)]);
        assert_eq!(consumed_bytes("m/x", 1), 2);
        assert_eq!(consumed_bytes("m", 1), 1);
    }
}
