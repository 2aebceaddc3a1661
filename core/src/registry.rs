//! Backend registry.
//!
//! Maps `(instance, filesystem-name)` to a connection fabric. Lookups may
//! block until a matching backend registers; a shutdown signal releases every
//! blocked waiter.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use vfs_ipc::ExchangePool;
use vfs_proto::{Errno, FsHandle, FsInfo, VfsResult};

/// A registered backend: its broker-issued handle, registration-time info
/// and the exchange pool used for every request sent to it.
#[derive(Debug)]
pub struct BackendConn {
    pub handle: FsHandle,
    pub info: FsInfo,
    pub pool: ExchangePool,
}

struct RegistryInner {
    by_key: HashMap<(u32, String), Arc<BackendConn>>,
    by_handle: HashMap<FsHandle, Arc<BackendConn>>,
    next_handle: u32,
    shutdown: bool,
}

pub struct FsRegistry {
    inner: Mutex<RegistryInner>,
    registered: Notify,
}

impl Default for FsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FsRegistry {
    pub fn new() -> Self {
        FsRegistry {
            inner: Mutex::new(RegistryInner {
                by_key: HashMap::new(),
                by_handle: HashMap::new(),
                next_handle: 1,
                shutdown: false,
            }),
            registered: Notify::new(),
        }
    }

    /// Publish a backend. Fails if the `(instance, name)` pair is taken.
    pub fn register(&self, info: FsInfo, pool: ExchangePool) -> VfsResult<Arc<BackendConn>> {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(Errno::Busy);
        }
        let key = (info.instance, info.name.clone());
        if inner.by_key.contains_key(&key) {
            return Err(Errno::Exists);
        }
        let handle = FsHandle::new(inner.next_handle).ok_or(Errno::NoMemory)?;
        inner.next_handle += 1;
        let conn = Arc::new(BackendConn { handle, info, pool });
        inner.by_key.insert(key, conn.clone());
        inner.by_handle.insert(handle, conn.clone());
        drop(inner);
        tracing::debug!(name = %conn.info.name, instance = conn.info.instance,
            handle = conn.handle.get(), "backend registered");
        self.registered.notify_waiters();
        Ok(conn)
    }

    fn find(&self, name: &str, instance: u32) -> Option<Arc<BackendConn>> {
        self.inner
            .lock()
            .by_key
            .get(&(instance, name.to_string()))
            .cloned()
    }

    /// Resolve a backend by name and instance.
    ///
    /// With `blocking`, waits until a matching register happens or the
    /// registry shuts down; otherwise a miss fails immediately.
    pub async fn resolve(
        &self,
        name: &str,
        instance: u32,
        blocking: bool,
    ) -> VfsResult<Arc<BackendConn>> {
        loop {
            // Arm the notification before checking, so a register between
            // the check and the wait is not lost.
            let notified = self.registered.notified();
            if let Some(conn) = self.find(name, instance) {
                return Ok(conn);
            }
            if !blocking || self.inner.lock().shutdown {
                return Err(Errno::NoEntry);
            }
            notified.await;
        }
    }

    pub fn by_handle(&self, handle: FsHandle) -> VfsResult<Arc<BackendConn>> {
        self.inner
            .lock()
            .by_handle
            .get(&handle)
            .cloned()
            .ok_or(Errno::NoEntry)
    }

    /// Refuse new registrations and release every blocked resolve.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        self.registered.notify_waiters();
    }
}
