use bitflags::bitflags;

use crate::Errno;

bitflags! {
    /// Client-facing WALK flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct WalkFlags: u32 {
        /// Require the terminal to be a regular file.
        const REGULAR = 1 << 0;
        /// Require the terminal to be a directory.
        const DIRECTORY = 1 << 1;
        /// Create the terminal if it is missing.
        const MAY_CREATE = 1 << 2;
        /// Create the terminal; fail if it already exists.
        const MUST_CREATE = 1 << 3;
        /// Stop at a mount point instead of descending into the child.
        const MOUNT_POINT = 1 << 4;
    }
}

impl WalkFlags {
    /// Validate a raw client flag word before any I/O happens.
    ///
    /// Create flags need a type flag so the backend knows what to create, and
    /// the two create variants and the two type flags are mutually exclusive.
    pub fn validate(raw: u32) -> Result<Self, Errno> {
        let flags = WalkFlags::from_bits(raw).ok_or(Errno::Invalid)?;
        if flags.contains(WalkFlags::MAY_CREATE | WalkFlags::MUST_CREATE) {
            return Err(Errno::Invalid);
        }
        if flags.contains(WalkFlags::REGULAR | WalkFlags::DIRECTORY) {
            return Err(Errno::Invalid);
        }
        if flags.intersects(WalkFlags::MAY_CREATE | WalkFlags::MUST_CREATE)
            && !flags.intersects(WalkFlags::REGULAR | WalkFlags::DIRECTORY)
        {
            return Err(Errno::Invalid);
        }
        Ok(flags)
    }
}

bitflags! {
    /// Resolver-facing lookup flags, forwarded to backends.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LookupFlags: u32 {
        const FILE = 1 << 0;
        const DIRECTORY = 1 << 1;
        const CREATE = 1 << 2;
        const EXCLUSIVE = 1 << 3;
        const UNLINK = 1 << 4;
        /// Stop at mount points rather than descending into the child.
        const MOUNT_POINT = 1 << 5;
        /// Ignore mount-point overlays entirely (rename's atomic swap).
        const DISABLE_MOUNTS = 1 << 6;
        /// Link an existing node index under the terminal name.
        const LINK = 1 << 7;
    }
}

/// Translate validated WALK flags into the resolver's lookup flags.
pub fn walk_lookup_flags(flags: WalkFlags) -> LookupFlags {
    let mut lflags = LookupFlags::empty();
    if flags.intersects(WalkFlags::MAY_CREATE | WalkFlags::MUST_CREATE) {
        lflags |= LookupFlags::CREATE;
    }
    if flags.contains(WalkFlags::MUST_CREATE) {
        lflags |= LookupFlags::EXCLUSIVE;
    }
    if flags.contains(WalkFlags::REGULAR) {
        lflags |= LookupFlags::FILE;
    }
    if flags.contains(WalkFlags::DIRECTORY) {
        lflags |= LookupFlags::DIRECTORY;
    }
    if flags.contains(WalkFlags::MOUNT_POINT) {
        lflags |= LookupFlags::MOUNT_POINT;
    }
    lflags
}

bitflags! {
    /// Open-mode bits latched into a descriptor by OPEN2 and bounded by the
    /// permissions fixed at walk time.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
    }
}

/// Seek origin for the SEEK request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Current,
    End,
}

impl SeekWhence {
    pub fn code(self) -> u64 {
        match self {
            SeekWhence::Set => 0,
            SeekWhence::Current => 1,
            SeekWhence::End => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(SeekWhence::Set),
            1 => Some(SeekWhence::Current),
            2 => Some(SeekWhence::End),
            _ => None,
        }
    }
}
