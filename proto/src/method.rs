/// Method codes on the client request surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ClientMethod {
    Mount = 1,
    Unmount = 2,
    Walk = 3,
    Open2 = 4,
    Read = 5,
    Write = 6,
    Seek = 7,
    Truncate = 8,
    Sync = 9,
    Fstat = 10,
    Close = 11,
    Unlink2 = 12,
    Rename = 13,
    Dup = 14,
    WaitHandle = 15,
    GetMtab = 16,
    /// Pacing handshake used inside MOUNT and GET_MTAB conversations.
    Ping = 17,
}

impl ClientMethod {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => ClientMethod::Mount,
            2 => ClientMethod::Unmount,
            3 => ClientMethod::Walk,
            4 => ClientMethod::Open2,
            5 => ClientMethod::Read,
            6 => ClientMethod::Write,
            7 => ClientMethod::Seek,
            8 => ClientMethod::Truncate,
            9 => ClientMethod::Sync,
            10 => ClientMethod::Fstat,
            11 => ClientMethod::Close,
            12 => ClientMethod::Unlink2,
            13 => ClientMethod::Rename,
            14 => ClientMethod::Dup,
            15 => ClientMethod::WaitHandle,
            16 => ClientMethod::GetMtab,
            17 => ClientMethod::Ping,
            _ => return None,
        })
    }
}

/// Method codes on the backend request surface (issued by the broker).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BackendMethod {
    Mounted = 101,
    Mount = 102,
    Unmount = 103,
    Unmounted = 104,
    Lookup = 105,
    OpenNode = 106,
    Read = 107,
    Write = 108,
    Truncate = 109,
    Sync = 110,
    Stat = 111,
    Destroy = 112,
    Link = 113,
}

impl BackendMethod {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            101 => BackendMethod::Mounted,
            102 => BackendMethod::Mount,
            103 => BackendMethod::Unmount,
            104 => BackendMethod::Unmounted,
            105 => BackendMethod::Lookup,
            106 => BackendMethod::OpenNode,
            107 => BackendMethod::Read,
            108 => BackendMethod::Write,
            109 => BackendMethod::Truncate,
            110 => BackendMethod::Sync,
            111 => BackendMethod::Stat,
            112 => BackendMethod::Destroy,
            113 => BackendMethod::Link,
            _ => return None,
        })
    }
}
