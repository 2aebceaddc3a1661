//! Client sessions and the per-connection dispatch loop.
//!
//! A session owns one descriptor table and may be served over any number of
//! connections; descriptors are shared between the client's tasks and
//! protected by their own mutexes. Each connection is one conversation at a
//! time, driven by [`serve_client`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use vfs_ipc::{channel, Call, Endpoint, Listener};
use vfs_proto::{merge_i64, ClientMethod, Errno, SeekWhence, ServiceId, VfsResult};

use crate::file::FileTable;
use crate::mtab;
use crate::ops::Broker;

const CONNECTION_DEPTH: usize = 8;
const MAX_PATH: usize = 4096;
const MAX_MNTOPTS: usize = 1024;
const MAX_FS_NAME: usize = 256;

pub struct ClientSession {
    files: FileTable,
    handles: Mutex<VecDeque<u64>>,
    handle_ready: Notify,
}

impl ClientSession {
    pub fn new() -> Arc<Self> {
        Arc::new(ClientSession {
            files: FileTable::new(),
            handles: Mutex::new(VecDeque::new()),
            handle_ready: Notify::new(),
        })
    }

    pub(crate) fn files(&self) -> &FileTable {
        &self.files
    }

    /// Queue a descriptor for the session's next WAIT_HANDLE.
    pub fn push_handle(&self, fd: u64) {
        self.handles.lock().push_back(fd);
        self.handle_ready.notify_waiters();
    }

    /// Pop the next queued descriptor, parking until one arrives.
    pub async fn wait_handle(&self) -> u64 {
        loop {
            let ready = self.handle_ready.notified();
            if let Some(fd) = self.handles.lock().pop_front() {
                return fd;
            }
            ready.await;
        }
    }
}

impl Broker {
    /// Open a connection serving `session`. Each connection runs in its own
    /// task; all connections of one session share its descriptor table.
    pub fn attach_client(self: &Arc<Self>, session: Arc<ClientSession>) -> Endpoint {
        let (endpoint, listener) = channel(CONNECTION_DEPTH);
        let broker = self.clone();
        tokio::spawn(serve_client(broker, session, listener));
        endpoint
    }
}

async fn serve_client(broker: Arc<Broker>, session: Arc<ClientSession>, mut listener: Listener) {
    while let Some(call) = listener.accept().await {
        let method = match ClientMethod::from_code(call.method()) {
            Some(method) => method,
            None => {
                call.answer_err(Errno::NotSupported);
                continue;
            }
        };
        dispatch(&broker, &session, method, call, &mut listener).await;
    }
    tracing::trace!("client connection closed");
}

async fn dispatch(
    broker: &Arc<Broker>,
    session: &Arc<ClientSession>,
    method: ClientMethod,
    call: Call,
    listener: &mut Listener,
) {
    match method {
        ClientMethod::Mount => mount(broker, call, listener).await,
        ClientMethod::Unmount => {
            let path = match listener.accept_data_write(MAX_PATH).await {
                Ok(path) => path,
                Err(errno) => return call.answer_err(errno),
            };
            let path = match String::from_utf8(path) {
                Ok(path) => path,
                Err(_) => return call.answer_err(Errno::Invalid),
            };
            answer_status(call, broker.unmount(&path).await);
        }
        ClientMethod::Walk => {
            let [parent_fd, flags, ..] = call.args();
            let path = match listener.accept_data_write(MAX_PATH).await {
                Ok(path) => path,
                Err(errno) => return call.answer_err(errno),
            };
            let path = match String::from_utf8(path) {
                Ok(path) => path,
                Err(_) => return call.answer_err(Errno::Invalid),
            };
            match broker.walk(session, parent_fd, &path, flags as u32).await {
                Ok(fd) => call.answer_ok([fd, 0, 0]),
                Err(errno) => call.answer_err(errno),
            }
        }
        ClientMethod::Open2 => {
            let [fd, mode, ..] = call.args();
            answer_status(call, broker.open2(session, fd, mode as u32).await);
        }
        ClientMethod::Read => {
            let [fd, ..] = call.args();
            let request = match listener.accept_data_read().await {
                Ok(request) => request,
                Err(errno) => return call.answer_err(errno),
            };
            match broker.read(session, fd, request.max()).await {
                Ok((bytes, data)) => {
                    request.fulfil(data);
                    call.answer_ok([bytes, 0, 0]);
                }
                Err(errno) => {
                    request.deny(errno);
                    call.answer_err(errno);
                }
            }
        }
        ClientMethod::Write => {
            let [fd, ..] = call.args();
            let payload = match listener.accept_data_write(0).await {
                Ok(payload) => payload,
                Err(errno) => return call.answer_err(errno),
            };
            match broker.write(session, fd, payload).await {
                Ok((bytes, size)) => call.answer_ok([
                    bytes,
                    vfs_proto::lower32(size),
                    vfs_proto::upper32(size),
                ]),
                Err(errno) => call.answer_err(errno),
            }
        }
        ClientMethod::Seek => {
            let [fd, off_lo, off_hi, whence] = call.args();
            let whence = match SeekWhence::from_code(whence) {
                Some(whence) => whence,
                None => return call.answer_err(Errno::Invalid),
            };
            let offset = merge_i64(off_lo, off_hi);
            match broker.seek(session, fd, offset, whence).await {
                Ok(pos) => {
                    call.answer_ok([vfs_proto::lower32(pos), vfs_proto::upper32(pos), 0])
                }
                Err(errno) => call.answer_err(errno),
            }
        }
        ClientMethod::Truncate => {
            let [fd, size_lo, size_hi, ..] = call.args();
            let size = vfs_proto::merge_loup32(size_lo, size_hi);
            answer_status(call, broker.truncate(session, fd, size).await);
        }
        ClientMethod::Sync => {
            let [fd, ..] = call.args();
            answer_status(call, broker.sync(session, fd).await);
        }
        ClientMethod::Fstat => {
            let [fd, ..] = call.args();
            let request = match listener.accept_data_read().await {
                Ok(request) => request,
                Err(errno) => return call.answer_err(errno),
            };
            match broker.fstat(session, fd, request.max()).await {
                Ok(data) => {
                    request.fulfil(data);
                    call.answer_ok([0; 3]);
                }
                Err(errno) => {
                    request.deny(errno);
                    call.answer_err(errno);
                }
            }
        }
        ClientMethod::Close => {
            let [fd, ..] = call.args();
            answer_status(call, broker.close(session, fd).await);
        }
        ClientMethod::Unlink2 => {
            let [parent_fd, expect_fd, flags, ..] = call.args();
            let path = match listener.accept_data_write(MAX_PATH).await {
                Ok(path) => path,
                Err(errno) => return call.answer_err(errno),
            };
            let path = match String::from_utf8(path) {
                Ok(path) => path,
                Err(_) => return call.answer_err(Errno::Invalid),
            };
            answer_status(
                call,
                broker
                    .unlink(session, parent_fd, expect_fd, flags as u32, &path)
                    .await,
            );
        }
        ClientMethod::Rename => {
            let [base_fd, ..] = call.args();
            let old = match listener.accept_data_write(MAX_PATH).await {
                Ok(old) => old,
                Err(errno) => return call.answer_err(errno),
            };
            let new = match listener.accept_data_write(MAX_PATH).await {
                Ok(new) => new,
                Err(errno) => return call.answer_err(errno),
            };
            let (old, new) = match (String::from_utf8(old), String::from_utf8(new)) {
                (Ok(old), Ok(new)) => (old, new),
                _ => return call.answer_err(Errno::Invalid),
            };
            answer_status(call, broker.rename(session, base_fd, &old, &new).await);
        }
        ClientMethod::Dup => {
            let [old_fd, new_fd, ..] = call.args();
            match broker.dup(session, old_fd, new_fd).await {
                Ok(fd) => call.answer_ok([fd, 0, 0]),
                Err(errno) => call.answer_err(errno),
            }
        }
        ClientMethod::WaitHandle => {
            let fd = session.wait_handle().await;
            call.answer_ok([fd, 0, 0]);
        }
        ClientMethod::GetMtab => {
            mtab::stream_mtab(broker.mounts().snapshot(), call, listener).await;
        }
        ClientMethod::Ping => {
            call.answer_ok([0; 3]);
        }
    }
}

fn answer_status(call: Call, result: VfsResult<()>) {
    match result {
        Ok(()) => call.answer_ok([0; 3]),
        Err(errno) => call.answer_err(errno),
    }
}

async fn mount(broker: &Arc<Broker>, call: Call, listener: &mut Listener) {
    let [service_id, flags, instance, ..] = call.args();
    let blocking = flags & 1 != 0;

    let mount_point = match listener.accept_data_write(MAX_PATH).await {
        Ok(data) => data,
        Err(errno) => return call.answer_err(errno),
    };
    let opts = match listener.accept_data_write(MAX_MNTOPTS).await {
        Ok(data) => data,
        Err(errno) => return call.answer_err(errno),
    };
    let fs_name = match listener.accept_data_write(MAX_FS_NAME).await {
        Ok(data) => data,
        Err(errno) => return call.answer_err(errno),
    };

    // The ping lets us refuse an unknown filesystem name before the caller
    // commits to waiting for the mount itself.
    let ping = match listener.next_call().await {
        Ok(ping) => ping,
        Err(_) => return call.answer_err(Errno::Io),
    };
    if ping.method() != ClientMethod::Ping as u32 {
        ping.answer_err(Errno::NotSupported);
        return call.answer_err(Errno::NotSupported);
    }

    let decoded = (
        String::from_utf8(mount_point),
        String::from_utf8(opts),
        String::from_utf8(fs_name),
    );
    let (mount_point, opts, fs_name) = match decoded {
        (Ok(mount_point), Ok(opts), Ok(fs_name)) => (mount_point, opts, fs_name),
        _ => {
            ping.answer_err(Errno::Invalid);
            return call.answer_err(Errno::Invalid);
        }
    };

    let result = broker
        .mount(
            &fs_name,
            instance as u32,
            blocking,
            ServiceId(service_id),
            &mount_point,
            &opts,
        )
        .await;
    match result {
        Ok(()) => {
            ping.answer_ok([0; 3]);
            call.answer_ok([0; 3]);
        }
        Err(errno) => {
            ping.answer_err(errno);
            call.answer_err(errno);
        }
    }
}
