//! Core identifier types.

use core::num::NonZeroU32;

/// Handle for a registered backend filesystem server.
///
/// `0` is reserved for "unset/invalid". Handles are issued by the broker's
/// backend registry and are only meaningful inside one broker instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FsHandle(NonZeroU32);

impl FsHandle {
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Backend-assigned identifier for one mounted volume (one service) of a
/// backend server. A single backend may serve many volumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ServiceId(pub u64);

/// Backend-assigned node index, stable for the lifetime of the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FsIndex(pub u64);

/// The backend-stable identity of a node. Equality is componentwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub fs_handle: FsHandle,
    pub service_id: ServiceId,
    pub index: FsIndex,
}

/// Coarse node type as reported by backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
    Other,
}

impl NodeKind {
    pub fn code(self) -> u64 {
        match self {
            NodeKind::Directory => 0,
            NodeKind::File => 1,
            NodeKind::Other => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(NodeKind::Directory),
            1 => Some(NodeKind::File),
            2 => Some(NodeKind::Other),
            _ => None,
        }
    }
}

/// The transient result of one path resolution. Never cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupResult {
    pub triplet: Triplet,
    pub size: u64,
    pub kind: NodeKind,
}

/// Registration-time description of a backend filesystem server.
///
/// The capability bits gate how the broker locks node contents around
/// READ/WRITE forwarding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsInfo {
    pub name: String,
    pub instance: u32,
    /// Reads and writes on one node may run concurrently.
    pub concurrent_read_write: bool,
    /// Writes never change the file size.
    pub write_retains_size: bool,
}

/// Stat record forwarded verbatim from a backend to the client buffer.
///
/// Fixed-width little-endian encoding so the broker can treat it as opaque
/// bytes while clients and tests can still decode it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeStat {
    pub service_id: ServiceId,
    pub index: FsIndex,
    pub kind: NodeKind,
    pub links: u32,
    pub size: u64,
}

impl NodeStat {
    pub const WIRE_LEN: usize = 5 * 8;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        out.extend_from_slice(&self.service_id.0.to_le_bytes());
        out.extend_from_slice(&self.index.0.to_le_bytes());
        out.extend_from_slice(&self.kind.code().to_le_bytes());
        out.extend_from_slice(&u64::from(self.links).to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let word = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(buf)
        };
        Some(NodeStat {
            service_id: ServiceId(word(0)),
            index: FsIndex(word(1)),
            kind: NodeKind::from_code(word(2))?,
            links: word(3) as u32,
            size: word(4),
        })
    }
}
