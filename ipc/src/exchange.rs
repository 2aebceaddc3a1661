//! Backend exchange pools.
//!
//! Each registered backend owns a bounded pool of connections ("exchanges").
//! Grabbing an exchange is a suspension point; the exchange goes back to the
//! pool when dropped. One exchange carries one conversation at a time, so the
//! grab/release discipline is what keeps request and data phases ordered.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use vfs_proto::{Errno, VfsResult};

use crate::frame::Endpoint;

/// Mints new served connections to one backend.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self) -> Endpoint;
}

struct PoolInner {
    connector: Arc<dyn Connect>,
    free: Mutex<Vec<Endpoint>>,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct ExchangePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ExchangePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangePool").finish_non_exhaustive()
    }
}

impl ExchangePool {
    pub fn new(connector: Arc<dyn Connect>, exchanges: usize) -> Self {
        let exchanges = exchanges.max(1);
        let free = (0..exchanges).map(|_| connector.connect()).collect();
        ExchangePool {
            inner: Arc::new(PoolInner {
                connector,
                free: Mutex::new(free),
                permits: Arc::new(Semaphore::new(exchanges)),
            }),
        }
    }

    /// Acquire an exchange, suspending until one is free.
    pub async fn grab(&self) -> VfsResult<Exchange> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Errno::Io)?;
        let endpoint = self.inner.free.lock().pop().ok_or(Errno::Io)?;
        Ok(Exchange {
            endpoint,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Mint a fresh connection to the same backend, for splicing into a
    /// third party (the mount protocol's connection clone).
    pub fn clone_connection(&self) -> Endpoint {
        self.inner.connector.connect()
    }
}

/// One grabbed exchange. Dereferences to the underlying [`Endpoint`].
pub struct Exchange {
    endpoint: Endpoint,
    pool: Arc<PoolInner>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Deref for Exchange {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.pool.free.lock().push(self.endpoint.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{channel, Listener, Reply};

    struct EchoConnect;

    impl Connect for EchoConnect {
        fn connect(&self) -> Endpoint {
            let (endpoint, mut listener): (Endpoint, Listener) = channel(4);
            tokio::spawn(async move {
                while let Some(call) = listener.accept().await {
                    let args = call.args();
                    call.answer(Reply::ok([args[0], args[1], args[2]]));
                }
            });
            endpoint
        }
    }

    #[tokio::test]
    async fn grab_released_on_drop() {
        let pool = ExchangePool::new(Arc::new(EchoConnect), 1);
        {
            let exch = pool.grab().await.expect("grab");
            let reply = exch.call(1, [1, 2, 3, 0]).await.expect("reply");
            assert_eq!(reply.result(), Ok([1, 2, 3]));
        }
        // The single exchange is free again.
        let _exch = pool.grab().await.expect("second grab");
    }

    #[tokio::test]
    async fn grab_waits_for_a_free_exchange() {
        let pool = ExchangePool::new(Arc::new(EchoConnect), 1);
        let held = pool.grab().await.expect("grab");
        let contender = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.grab().await.map(|_| ()) })
        };
        // The contender cannot finish while the exchange is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(held);
        contender.await.expect("join").expect("grab");
    }

    #[tokio::test]
    async fn cloned_connection_reaches_the_same_backend() {
        let pool = ExchangePool::new(Arc::new(EchoConnect), 1);
        let spliced = pool.clone_connection();
        let reply = spliced.call(9, [4, 5, 6, 0]).await.expect("reply");
        assert_eq!(reply.result(), Ok([4, 5, 6]));
    }
}
