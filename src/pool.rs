/*
 * pool.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Connection pools: admission control, per-host affinity, idle eviction.
//!
//! Three strategies behind one trait: `SmartPool` prefers the connection
//! already bound to the target endpoint, `CyclicQueuePool` rotates FIFO
//! regardless of host, `WsPool` is a factory with no pooling at all.
//! Invariant for the real pools: free connections + outstanding permits
//! equals the configured size, and `is_all_free` is true exactly when no
//! permit is held.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{PoolConfig, Timeouts};
use crate::connection::Connection;
use crate::error::{Error, Result};

#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Take a connection, preferring one bound to `key` where the strategy
    /// supports affinity. Bounded by the `pool_acquire` timeout.
    async fn acquire(&self, key: Option<&str>) -> Result<Connection>;

    /// Return a connection to the pool.
    fn release(&self, conn: Connection);

    fn free_conns(&self) -> usize;

    fn is_all_free(&self) -> bool;

    /// Close every connection. The pool is unusable afterwards.
    async fn cleanup(&self);

    fn conf(&self) -> &PoolConfig;
}

/// Scoped acquisition: dereferences to the connection and releases it on
/// every exit path. A guard dropped while its connection is still blocked
/// (body not drained) closes that connection and returns a fresh unbound
/// one so the pool invariant holds.
pub struct ConnGuard {
    conn: Option<Connection>,
    pool: Arc<dyn ConnectionPool>,
}

impl std::fmt::Debug for ConnGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnGuard").field("conn", &self.conn).finish()
    }
}

impl ConnGuard {
    pub fn new(conn: Connection, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Orderly release: bind or unbind per the keep flag, bump the request
    /// count, hand the connection back.
    pub fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.finish_scope();
            conn.mark_released();
            self.pool.release(conn);
        }
    }
}

impl Deref for ConnGuard {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for ConnGuard {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if conn.is_blocked() {
                // Body was never drained; the transport is mid-response
                // and cannot be recycled.
                debug!(conn = conn.id(), "dropping blocked connection");
                conn.close();
                self.pool.release(Connection::new(self.pool.conf()));
            } else {
                conn.finish_scope();
                conn.mark_released();
                self.pool.release(conn);
            }
        }
    }
}

async fn take_permit(sem: &Semaphore, timeouts: &Timeouts) -> Result<()> {
    let permit = match timeouts.pool_acquire {
        Some(t) => timeout(t, sem.acquire())
            .await
            .map_err(|_| Error::PoolAcquireTimeout)?
            .map_err(|_| Error::PoolAcquireTimeout)?,
        None => sem.acquire().await.map_err(|_| Error::PoolAcquireTimeout)?,
    };
    permit.forget();
    Ok(())
}

/// Pool that prefers reusing the connection bound to the same endpoint.
pub struct SmartPool {
    conf: PoolConfig,
    timeouts: Timeouts,
    sem: Semaphore,
    free: Mutex<Vec<Connection>>,
}

impl SmartPool {
    pub fn new(conf: PoolConfig, timeouts: Timeouts) -> Self {
        let free = (0..conf.size).map(|_| Connection::new(&conf)).collect();
        Self {
            conf,
            timeouts,
            sem: Semaphore::new(conf.size),
            free: Mutex::new(free),
        }
    }
}

#[async_trait]
impl ConnectionPool for SmartPool {
    async fn acquire(&self, key: Option<&str>) -> Result<Connection> {
        take_permit(&self.sem, &self.timeouts).await?;

        let taken = {
            let mut free = self.free.lock().unwrap();
            let found = key.and_then(|k| free.iter().position(|c| c.key() == Some(k)));
            match found {
                Some(i) => Some(free.swap_remove(i)),
                None => free.pop(),
            }
        };
        let Some(mut conn) = taken else {
            self.sem.add_permits(1);
            return Err(Error::Connection("pool has no free connection".into()));
        };

        if conn.is_idle(self.conf.max_conn_idle) {
            debug!(conn = conn.id(), "closing idle connection");
            conn.close();
            conn = Connection::new(&self.conf);
        }
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        self.free.lock().unwrap().push(conn);
        self.sem.add_permits(1);
    }

    fn free_conns(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn is_all_free(&self) -> bool {
        self.sem.available_permits() == self.conf.size
    }

    async fn cleanup(&self) {
        for _ in 0..self.conf.size {
            if let Ok(permit) = self.sem.acquire().await {
                permit.forget();
            }
        }
        let mut free = self.free.lock().unwrap();
        for conn in free.iter_mut() {
            conn.close();
        }
        free.clear();
    }

    fn conf(&self) -> &PoolConfig {
        &self.conf
    }
}

/// FIFO queue of pre-allocated connections; strict round-robin reuse.
pub struct CyclicQueuePool {
    conf: PoolConfig,
    timeouts: Timeouts,
    sem: Semaphore,
    queue: Mutex<VecDeque<Connection>>,
}

impl CyclicQueuePool {
    pub fn new(conf: PoolConfig, timeouts: Timeouts) -> Self {
        let queue = (0..conf.size).map(|_| Connection::new(&conf)).collect();
        Self {
            conf,
            timeouts,
            sem: Semaphore::new(conf.size),
            queue: Mutex::new(queue),
        }
    }
}

#[async_trait]
impl ConnectionPool for CyclicQueuePool {
    async fn acquire(&self, _key: Option<&str>) -> Result<Connection> {
        take_permit(&self.sem, &self.timeouts).await?;
        let taken = self.queue.lock().unwrap().pop_front();
        let Some(mut conn) = taken else {
            self.sem.add_permits(1);
            return Err(Error::Connection("pool has no free connection".into()));
        };
        if conn.is_idle(self.conf.max_conn_idle) {
            conn.close();
            conn = Connection::new(&self.conf);
        }
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        self.queue.lock().unwrap().push_back(conn);
        self.sem.add_permits(1);
    }

    fn free_conns(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn is_all_free(&self) -> bool {
        self.sem.available_permits() == self.conf.size
    }

    async fn cleanup(&self) {
        for _ in 0..self.conf.size {
            if let Ok(permit) = self.sem.acquire().await {
                permit.forget();
            }
        }
        let mut queue = self.queue.lock().unwrap();
        for conn in queue.iter_mut() {
            conn.close();
        }
        queue.clear();
    }

    fn conf(&self) -> &PoolConfig {
        &self.conf
    }
}

/// Connection factory for WebSockets. Each acquire is a fresh connection;
/// release drops it; the pool is always "all free".
pub struct WsPool {
    conf: PoolConfig,
}

impl WsPool {
    pub fn new(conf: PoolConfig, _timeouts: Timeouts) -> Self {
        Self { conf }
    }
}

#[async_trait]
impl ConnectionPool for WsPool {
    async fn acquire(&self, _key: Option<&str>) -> Result<Connection> {
        Ok(Connection::new(&self.conf))
    }

    fn release(&self, _conn: Connection) {}

    fn free_conns(&self) -> usize {
        self.conf.size
    }

    fn is_all_free(&self) -> bool {
        true
    }

    async fn cleanup(&self) {}

    fn conf(&self) -> &PoolConfig {
        &self.conf
    }
}
