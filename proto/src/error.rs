use std::fmt;

/// Status vocabulary shared by both request surfaces.
///
/// This is intentionally errno-like: every failure a client or the broker can
/// observe maps to exactly one of these values, and the wire carries the raw
/// code. Success is the absence of an `Errno` (`status == 0` on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Errno {
    NoEntry,      // ENOENT
    Busy,         // EBUSY
    NoMemory,     // ENOMEM
    Invalid,      // EINVAL
    NotPermitted, // EPERM
    BadFd,        // EBADF
    Exists,       // EEXIST
    NotSupported, // ENOTSUP
    Io,           // EIO
    Overflow,     // EOVERFLOW
}

pub type VfsResult<T> = Result<T, Errno>;

impl Errno {
    /// Raw status code carried on the wire. `0` means success and is never a
    /// valid `Errno`.
    pub fn code(self) -> u32 {
        match self {
            Errno::NoEntry => 1,
            Errno::Busy => 2,
            Errno::NoMemory => 3,
            Errno::Invalid => 4,
            Errno::NotPermitted => 5,
            Errno::BadFd => 6,
            Errno::Exists => 7,
            Errno::NotSupported => 8,
            Errno::Io => 9,
            Errno::Overflow => 10,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Errno::NoEntry),
            2 => Some(Errno::Busy),
            3 => Some(Errno::NoMemory),
            4 => Some(Errno::Invalid),
            5 => Some(Errno::NotPermitted),
            6 => Some(Errno::BadFd),
            7 => Some(Errno::Exists),
            8 => Some(Errno::NotSupported),
            9 => Some(Errno::Io),
            10 => Some(Errno::Overflow),
            _ => None,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Errno::NoEntry => write!(f, "no such entry"),
            Errno::Busy => write!(f, "resource busy"),
            Errno::NoMemory => write!(f, "out of memory"),
            Errno::Invalid => write!(f, "invalid argument"),
            Errno::NotPermitted => write!(f, "operation not permitted"),
            Errno::BadFd => write!(f, "bad file descriptor"),
            Errno::Exists => write!(f, "entry already exists"),
            Errno::NotSupported => write!(f, "operation not supported"),
            Errno::Io => write!(f, "i/o error"),
            Errno::Overflow => write!(f, "value too large"),
        }
    }
}

impl std::error::Error for Errno {}
