//! Connection pooling and the in-memory transactional database
//!
//! [`ConnectionPool`] hands out one connection per thread. Nested
//! acquisitions on the same thread share the checked-out connection and
//! are reference counted; the connection is rolled back and returned to
//! the dormant list when the last guard of that thread is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TracError};

pub trait Connection: Send + 'static {
    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether the connection may be reused after release.
    fn poolable(&self) -> bool {
        true
    }
}

pub trait DatabaseBackend: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self) -> Result<Self::Conn>;
}

type Shared<C> = Arc<Mutex<C>>;

struct Checkout<C> {
    count: usize,
    cnx: Shared<C>,
}

struct PoolState<C> {
    dormant: Vec<C>,
    active: HashMap<ThreadId, Checkout<C>>,
    cursize: usize,
}

struct PoolInner<B: DatabaseBackend> {
    backend: B,
    maxsize: usize,
    state: Mutex<PoolState<B::Conn>>,
    available: Condvar,
}

/// A bounded, thread-affine pool. `maxsize == 0` means unbounded.
pub struct ConnectionPool<B: DatabaseBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: DatabaseBackend> Clone for ConnectionPool<B> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: DatabaseBackend> ConnectionPool<B> {
    pub fn new(maxsize: usize, backend: B) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                backend,
                maxsize,
                state: Mutex::new(PoolState {
                    dormant: Vec::new(),
                    active: HashMap::new(),
                    cursize: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Connections currently open, checked out or dormant.
    pub fn size(&self) -> usize {
        self.lock_state().cursize
    }

    pub fn dormant_count(&self) -> usize {
        self.lock_state().dormant.len()
    }

    /// Get this thread's connection, waiting up to `timeout` for one to
    /// become free when the pool is exhausted.
    pub fn get_cnx(&self, timeout: Option<Duration>) -> Result<PooledConnection<B>> {
        let start = Instant::now();
        let tid = thread::current().id();
        let mut state = self.lock_state();

        if let Some(checkout) = state.active.get_mut(&tid) {
            checkout.count += 1;
            return Ok(self.guard(tid, Arc::clone(&checkout.cnx)));
        }

        let cnx = loop {
            if let Some(cnx) = state.dormant.pop() {
                break cnx;
            }
            if self.inner.maxsize == 0 || state.cursize < self.inner.maxsize {
                let cnx = self.inner.backend.connect()?;
                state.cursize += 1;
                debug!("Opened database connection ({} open)", state.cursize);
                break cnx;
            }
            state = match timeout {
                Some(timeout) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(TracError::Timeout {
                            seconds: timeout.as_secs(),
                        });
                    }
                    let (state, _) = self
                        .inner
                        .available
                        .wait_timeout(state, timeout - elapsed)
                        .unwrap_or_else(|e| e.into_inner());
                    state
                }
                None => self
                    .inner
                    .available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        };

        let cnx = Arc::new(Mutex::new(cnx));
        state.active.insert(
            tid,
            Checkout {
                count: 1,
                cnx: Arc::clone(&cnx),
            },
        );
        Ok(self.guard(tid, cnx))
    }

    /// Drop every dormant connection.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        let closed = state.dormant.len();
        state.dormant.clear();
        state.cursize -= closed;
        debug!("Closed {} dormant database connection(s)", closed);
    }

    fn guard(&self, tid: ThreadId, cnx: Shared<B::Conn>) -> PooledConnection<B> {
        PooledConnection {
            pool: self.clone(),
            tid,
            cnx: Some(cnx),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<B::Conn>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn return_cnx(&self, tid: ThreadId, cnx: Shared<B::Conn>) {
        let mut state = self.lock_state();
        let Some(checkout) = state.active.get_mut(&tid) else {
            return;
        };
        if checkout.count > 1 {
            checkout.count -= 1;
            return;
        }
        if let Some(checkout) = state.active.remove(&tid) {
            drop(checkout.cnx);
        }

        match Arc::try_unwrap(cnx) {
            Ok(cnx) => {
                let mut cnx = cnx.into_inner().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = cnx.rollback() {
                    warn!("Rollback on connection release failed: {}", e);
                }
                if cnx.poolable() {
                    state.dormant.push(cnx);
                } else {
                    state.cursize -= 1;
                }
            }
            Err(_) => state.cursize -= 1,
        }
        self.inner.available.notify_one();
    }
}

impl<B: DatabaseBackend> fmt::Debug for ConnectionPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ConnectionPool")
            .field("maxsize", &self.inner.maxsize)
            .field("cursize", &state.cursize)
            .field("dormant", &state.dormant.len())
            .finish()
    }
}

/// A checked-out connection, released back to its pool on drop.
pub struct PooledConnection<B: DatabaseBackend> {
    pool: ConnectionPool<B>,
    tid: ThreadId,
    cnx: Option<Shared<B::Conn>>,
}

impl<B: DatabaseBackend> PooledConnection<B> {
    /// Borrow the underlying connection.
    pub fn lock(&self) -> MutexGuard<'_, B::Conn> {
        match &self.cnx {
            Some(cnx) => cnx.lock().unwrap_or_else(|e| e.into_inner()),
            None => unreachable!("connection taken before drop"),
        }
    }

    pub fn commit(&self) -> Result<()> {
        self.lock().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.lock().rollback()
    }
}

impl<B: DatabaseBackend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        if let Some(cnx) = self.cnx.take() {
            self.pool.return_cnx(self.tid, cnx);
        }
    }
}

/// Backend handing out copy-on-write transactions over a shared `T`.
pub struct MemoryDatabase<T> {
    committed: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for MemoryDatabase<T> {
    fn clone(&self) -> Self {
        MemoryDatabase {
            committed: Arc::clone(&self.committed),
        }
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for MemoryDatabase<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryDatabase<T> {
    pub fn new(initial: T) -> Self {
        MemoryDatabase {
            committed: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Latest committed state.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.committed.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl<T: Clone + Send + Sync + 'static> DatabaseBackend for MemoryDatabase<T> {
    type Conn = MemoryConnection<T>;

    fn connect(&self) -> Result<Self::Conn> {
        Ok(MemoryConnection {
            db: self.clone(),
            working: None,
        })
    }
}

/// A transaction over a [`MemoryDatabase`]. Writes go to a private copy
/// until committed.
pub struct MemoryConnection<T> {
    db: MemoryDatabase<T>,
    working: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> MemoryConnection<T> {
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match &self.working {
            Some(working) => f(working),
            None => f(&self.db.snapshot()),
        }
    }

    pub fn write<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let working = self
            .working
            .get_or_insert_with(|| T::clone(&self.db.snapshot()));
        f(working)
    }

    pub fn in_transaction(&self) -> bool {
        self.working.is_some()
    }
}

impl<T: Clone + Send + Sync + 'static> Connection for MemoryConnection<T> {
    fn commit(&mut self) -> Result<()> {
        if let Some(working) = self.working.take() {
            *self.db.committed.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(working);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.working = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_checkout_shares_connection() {
        let pool = ConnectionPool::new(2, MemoryDatabase::new(0u32));
        let outer = pool.get_cnx(None).unwrap();
        outer.lock().write(|v| *v = 7);
        {
            let inner = pool.get_cnx(None).unwrap();
            assert_eq!(inner.lock().read(|v| *v), 7);
        }
        assert_eq!(pool.size(), 1);
        outer.commit().unwrap();
        drop(outer);
        assert_eq!(pool.dormant_count(), 1);
        assert_eq!(*pool.backend().snapshot(), 7);
    }

    #[test]
    fn test_release_rolls_back_uncommitted_writes() {
        let pool = ConnectionPool::new(1, MemoryDatabase::new(vec![1u8]));
        {
            let cnx = pool.get_cnx(None).unwrap();
            cnx.lock().write(|v| v.push(2));
        }
        let cnx = pool.get_cnx(None).unwrap();
        assert_eq!(cnx.lock().read(|v| v.clone()), vec![1]);
        assert!(!cnx.lock().in_transaction());
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let pool = ConnectionPool::new(1, MemoryDatabase::new(0u32));
        let _held = pool.get_cnx(None).unwrap();
        let other = pool.clone();
        let result = std::thread::spawn(move || {
            other
                .get_cnx(Some(Duration::from_millis(50)))
                .map(|_| ())
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(TracError::Timeout { .. })));
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let pool = ConnectionPool::new(1, MemoryDatabase::new(0u32));
        let held = pool.get_cnx(None).unwrap();
        let other = pool.clone();
        let waiter = std::thread::spawn(move || {
            other
                .get_cnx(Some(Duration::from_secs(5)))
                .map(|cnx| cnx.lock().read(|v| *v))
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_shutdown_closes_dormant() {
        let pool = ConnectionPool::new(3, MemoryDatabase::new(0u32));
        drop(pool.get_cnx(None).unwrap());
        assert_eq!(pool.dormant_count(), 1);
        pool.shutdown();
        assert_eq!(pool.size(), 0);
    }
}
