//! 32-bit word plumbing for 64-bit quantities.
//!
//! The argument channel carries 32-bit words; 64-bit offsets and sizes travel
//! as a low/high pair and are reassembled little-endian on word pairs.

use crate::{Errno, FsIndex, NodeKind};

#[inline]
pub fn lower32(value: u64) -> u64 {
    value & 0xffff_ffff
}

#[inline]
pub fn upper32(value: u64) -> u64 {
    value >> 32
}

#[inline]
pub fn merge_loup32(lo: u64, hi: u64) -> u64 {
    (lo & 0xffff_ffff) | (hi << 32)
}

/// Split a signed 64-bit offset into its two's-complement word pair.
#[inline]
pub fn split_i64(value: i64) -> (u64, u64) {
    let raw = value as u64;
    (lower32(raw), upper32(raw))
}

/// Reassemble a signed 64-bit offset from its word pair.
#[inline]
pub fn merge_i64(lo: u64, hi: u64) -> i64 {
    merge_loup32(lo, hi) as i64
}

/// Decoded form of a backend LOOKUP reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupReply {
    /// The walk ended inside this backend.
    Terminal {
        index: FsIndex,
        size: u64,
        kind: NodeKind,
    },
    /// The walk reached a mount-point node; the broker must continue in the
    /// mounted child after `consumed` bytes of the path.
    Crossing { mp_index: FsIndex, consumed: u64 },
}

const LOOKUP_TAG_TERMINAL: u64 = 0;
const LOOKUP_TAG_CROSSING: u64 = 1;

/// Pack a lookup reply into the three reply argument slots.
pub fn encode_lookup_reply(reply: LookupReply) -> [u64; 3] {
    match reply {
        LookupReply::Terminal { index, size, kind } => {
            [index.0, size, LOOKUP_TAG_TERMINAL << 32 | kind.code()]
        }
        LookupReply::Crossing { mp_index, consumed } => {
            [mp_index.0, consumed, LOOKUP_TAG_CROSSING << 32]
        }
    }
}

pub fn decode_lookup_reply(args: [u64; 3]) -> Result<LookupReply, Errno> {
    match upper32(args[2]) {
        LOOKUP_TAG_TERMINAL => Ok(LookupReply::Terminal {
            index: FsIndex(args[0]),
            size: args[1],
            kind: NodeKind::from_code(lower32(args[2])).ok_or(Errno::Io)?,
        }),
        LOOKUP_TAG_CROSSING => Ok(LookupReply::Crossing {
            mp_index: FsIndex(args[0]),
            consumed: args[1],
        }),
        _ => Err(Errno::Io),
    }
}
