//! Backend protocol handler: one task per connection.

use std::sync::Arc;

use vfs_ipc::{Call, Listener, Reply};
use vfs_proto::{
    encode_lookup_reply, lower32, merge_loup32, upper32, BackendMethod, Errno, FsIndex,
    LookupFlags, ServiceId, VfsResult,
};

use crate::fs::MemInner;
use crate::node::MountMarker;

const MAX_PATH: usize = 4096;
const MAX_OPTS: usize = 1024;

pub(crate) async fn serve(inner: Arc<MemInner>, mut listener: Listener) {
    while let Some(call) = listener.accept().await {
        let method = match BackendMethod::from_code(call.method()) {
            Some(method) => method,
            None => {
                call.answer_err(Errno::NotSupported);
                continue;
            }
        };
        handle(&inner, method, call, &mut listener).await;
    }
}

async fn handle(inner: &Arc<MemInner>, method: BackendMethod, call: Call, listener: &mut Listener) {
    match method {
        BackendMethod::Mounted => mounted(inner, call, listener).await,
        BackendMethod::Mount => mount(inner, call, listener).await,
        BackendMethod::Unmount => unmount(inner, call).await,
        BackendMethod::Unmounted => {
            let service = ServiceId(call.args()[0]);
            let result = inner.state.lock().drop_volume(service);
            tracing::debug!(fs = %inner.name, service = service.0, "volume unmounted");
            call.answer(Reply::from_result(result.map(|()| [0; 3])));
        }
        BackendMethod::Lookup => lookup(inner, call, listener).await,
        BackendMethod::Link => link(inner, call, listener).await,
        BackendMethod::OpenNode => {
            let [service, index, ..] = call.args();
            let result = inner
                .state
                .lock()
                .open_node(ServiceId(service), FsIndex(index));
            call.answer(Reply::from_result(result.map(|()| [0; 3])));
        }
        BackendMethod::Read => read(inner, call, listener).await,
        BackendMethod::Write => write(inner, call, listener).await,
        BackendMethod::Truncate => {
            let [service, index, lo, hi] = call.args();
            let size = merge_loup32(lo, hi);
            let result = inner
                .state
                .lock()
                .truncate(ServiceId(service), FsIndex(index), size);
            call.answer(Reply::from_result(result.map(|()| [0; 3])));
        }
        BackendMethod::Sync => {
            // Nothing is backed by stable storage; sync is a no-op.
            call.answer_ok([0; 3]);
        }
        BackendMethod::Stat => stat(inner, call, listener).await,
        BackendMethod::Destroy => {
            let [service, index, ..] = call.args();
            let result = inner
                .state
                .lock()
                .destroy(ServiceId(service), FsIndex(index));
            tracing::trace!(fs = %inner.name, index, "destroy");
            call.answer(Reply::from_result(result.map(|()| [0; 3])));
        }
    }
}

async fn mounted(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let service = ServiceId(call.args()[0]);
    let opts = match listener.accept_data_write(MAX_OPTS).await {
        Ok(opts) => opts,
        Err(errno) => return call.answer_err(errno),
    };
    let opts = String::from_utf8_lossy(&opts).into_owned();
    let result = inner.state.lock().create_volume(service, opts);
    match result {
        Ok((root, size)) => {
            tracing::debug!(fs = %inner.name, service = service.0, root = root.0, "volume mounted");
            call.answer_ok([root.0, lower32(size), upper32(size)]);
        }
        Err(errno) => call.answer_err(errno),
    }
}

/// A child filesystem is being mounted on one of our directories. The broker
/// splices in a connection to the child; we forward MOUNTED (with the mount
/// options) to the child ourselves and report its root back.
async fn mount(inner: &Arc<MemInner>, mut call: Call, listener: &mut Listener) {
    let [mp_service, mp_index, _child_handle, child_service] = call.args();
    let child = match call.take_cloned() {
        Some(endpoint) => endpoint,
        None => return call.answer_err(Errno::Invalid),
    };
    let opts = match listener.accept_data_write(MAX_OPTS).await {
        Ok(opts) => opts,
        Err(errno) => return call.answer_err(errno),
    };

    let reply = match child
        .call_with_data(BackendMethod::Mounted as u32, [child_service, 0, 0, 0], opts)
        .await
        .and_then(|reply| reply.result())
    {
        Ok(args) => args,
        Err(errno) => return call.answer_err(errno),
    };

    let marker = MountMarker {
        child_service: ServiceId(child_service),
        child,
    };
    let installed =
        inner
            .state
            .lock()
            .set_mount_marker(ServiceId(mp_service), FsIndex(mp_index), marker);
    match installed {
        Ok(()) => {
            tracing::debug!(
                fs = %inner.name,
                mp = mp_index,
                child = child_service,
                "mount point installed"
            );
            call.answer_ok(reply);
        }
        Err(errno) => call.answer_err(errno),
    }
}

async fn unmount(inner: &Arc<MemInner>, call: Call) {
    let [mp_service, mp_index, ..] = call.args();
    let marker = match inner
        .state
        .lock()
        .take_mount_marker(ServiceId(mp_service), FsIndex(mp_index))
    {
        Ok(marker) => marker,
        Err(errno) => return call.answer_err(errno),
    };

    let result = marker
        .child
        .call(
            BackendMethod::Unmounted as u32,
            [marker.child_service.0, 0, 0, 0],
        )
        .await
        .and_then(|reply| reply.result().map(|_| ()));

    match result {
        Ok(()) => {
            tracing::debug!(fs = %inner.name, mp = mp_index, "mount point removed");
            call.answer_ok([0; 3]);
        }
        Err(errno) => {
            // The child refused to go; leave the mount in place.
            let _ = inner.state.lock().set_mount_marker(
                ServiceId(mp_service),
                FsIndex(mp_index),
                marker,
            );
            call.answer_err(errno);
        }
    }
}

async fn lookup(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let [service, base, raw_flags, link_target] = call.args();
    let path = match listener.accept_data_write(MAX_PATH).await {
        Ok(path) => path,
        Err(errno) => return call.answer_err(errno),
    };
    let reply = lookup_inner(inner, service, base, raw_flags, link_target, &path);
    call.answer(Reply::from_result(reply));
}

fn lookup_inner(
    inner: &Arc<MemInner>,
    service: u64,
    base: u64,
    raw_flags: u64,
    link_target: u64,
    path: &[u8],
) -> VfsResult<[u64; 3]> {
    let flags = LookupFlags::from_bits(raw_flags as u32).ok_or(Errno::Invalid)?;
    let path = std::str::from_utf8(path).map_err(|_| Errno::Invalid)?;
    let target = flags
        .contains(LookupFlags::LINK)
        .then_some(FsIndex(link_target));
    let reply = inner
        .state
        .lock()
        .lookup(ServiceId(service), FsIndex(base), path, flags, target)?;
    Ok(encode_lookup_reply(reply))
}

async fn link(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let [service, base, target, raw_flags] = call.args();
    let path = match listener.accept_data_write(MAX_PATH).await {
        Ok(path) => path,
        Err(errno) => return call.answer_err(errno),
    };
    let reply = lookup_inner(
        inner,
        service,
        base,
        raw_flags | u64::from(LookupFlags::LINK.bits()),
        target,
        &path,
    );
    call.answer(Reply::from_result(reply));
}

async fn read(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let [service, index, pos_lo, pos_hi] = call.args();
    let pos = merge_loup32(pos_lo, pos_hi);
    let request = match listener.accept_data_read().await {
        Ok(request) => request,
        Err(errno) => return call.answer_err(errno),
    };
    let data = inner
        .state
        .lock()
        .read(ServiceId(service), FsIndex(index), pos, request.max());
    match data {
        Ok(data) => {
            let len = data.len() as u64;
            request.fulfil(data);
            call.answer_ok([len, 0, 0]);
        }
        Err(errno) => {
            request.deny(errno);
            call.answer_err(errno);
        }
    }
}

async fn write(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let [service, index, pos_lo, pos_hi] = call.args();
    let pos = merge_loup32(pos_lo, pos_hi);
    let payload = match listener.accept_data_write(0).await {
        Ok(payload) => payload,
        Err(errno) => return call.answer_err(errno),
    };
    let result = inner
        .state
        .lock()
        .write(ServiceId(service), FsIndex(index), pos, &payload);
    match result {
        Ok((written, size)) => call.answer_ok([written, lower32(size), upper32(size)]),
        Err(errno) => call.answer_err(errno),
    }
}

async fn stat(inner: &Arc<MemInner>, call: Call, listener: &mut Listener) {
    let [service, index, ..] = call.args();
    let request = match listener.accept_data_read().await {
        Ok(request) => request,
        Err(errno) => return call.answer_err(errno),
    };
    match inner.state.lock().stat(ServiceId(service), FsIndex(index)) {
        Ok(stat) => {
            request.fulfil(stat.to_bytes());
            call.answer_ok([0; 3]);
        }
        Err(errno) => {
            request.deny(errno);
            call.answer_err(errno);
        }
    }
}
