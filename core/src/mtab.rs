//! Mtab enumerator.
//!
//! Streams a snapshot of the mount table to the client: the first ping is
//! answered with the entry count, then each entry is transferred as three
//! data reads (mount point, options, filesystem name) followed by a ping
//! answered with the instance and service id. The per-entry ping lets the
//! client pace the transfer.

use vfs_ipc::{Call, Listener};
use vfs_proto::{ClientMethod, Errno};

use crate::mount::MtabEntry;

pub(crate) async fn stream_mtab(entries: Vec<MtabEntry>, call: Call, listener: &mut Listener) {
    let count = entries.len() as u64;

    let ping = match listener.next_call().await {
        Ok(ping) => ping,
        Err(_) => return call.answer_err(Errno::Io),
    };
    if ping.method() != ClientMethod::Ping as u32 {
        ping.answer_err(Errno::NotSupported);
        return call.answer_err(Errno::NotSupported);
    }
    ping.answer_ok([count, 0, 0]);

    for entry in &entries {
        let fields: [&[u8]; 3] = [
            entry.mount_point.as_str().as_bytes(),
            entry.opts.as_bytes(),
            entry.fs_name.as_bytes(),
        ];
        for field in fields {
            match listener.accept_data_read().await {
                Ok(request) => request.fulfil(field.to_vec()),
                Err(_) => return call.answer_err(Errno::NotSupported),
            }
        }
        let ping = match listener.next_call().await {
            Ok(ping) => ping,
            Err(_) => return call.answer_err(Errno::Io),
        };
        if ping.method() != ClientMethod::Ping as u32 {
            ping.answer_err(Errno::NotSupported);
            return call.answer_err(Errno::NotSupported);
        }
        ping.answer_ok([u64::from(entry.instance), entry.service_id.0, 0]);
    }

    call.answer_ok([count, 0, 0]);
}
