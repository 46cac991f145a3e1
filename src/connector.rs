/*
 * connector.rs
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

//! Connector: a pool of pools keyed by `scheme:host`, bound to a resolver
//! and default timeout budgets.
//!
//! `acquire` picks the pool, takes a connection, resolves the target (one
//! address chosen at random across multi-answer hosts) and connects within
//! the `sock_connect` budget. The permit is released on every failure path
//! through the guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{PoolConfig, PoolKind, Proxy, Timeouts};
use crate::dns::{AddressFamily, DnsCache, Resolver};
use crate::error::{Error, Result};
use crate::pool::{ConnGuard, ConnectionPool, CyclicQueuePool, SmartPool, WsPool};
use crate::url::ParsedUrl;

/// Pool key for targets without a dedicated configuration.
pub const DEFAULT_POOL_KEY: &str = ":default";

pub struct Connector {
    pool_configs: HashMap<String, (PoolKind, PoolConfig)>,
    pools: Mutex<HashMap<String, Arc<dyn ConnectionPool>>>,
    pub timeouts: Timeouts,
    resolver: Resolver,
    dns_cache: Arc<DnsCache>,
    proxy: Option<Proxy>,
}

impl Connector {
    pub fn new() -> Self {
        Self::with_pool(PoolKind::Smart, PoolConfig::default())
    }

    /// Connector whose default pool has the given strategy and sizing.
    pub fn with_pool(kind: PoolKind, conf: PoolConfig) -> Self {
        let cache = Arc::new(DnsCache::default());
        let mut pool_configs = HashMap::new();
        pool_configs.insert(DEFAULT_POOL_KEY.to_string(), (kind, conf));
        Self {
            pool_configs,
            pools: Mutex::new(HashMap::new()),
            timeouts: Timeouts::default(),
            resolver: Resolver::new(Some(cache.clone())),
            dns_cache: cache,
            proxy: None,
        }
    }

    /// Dedicated pool configuration for one `scheme:host` key.
    pub fn pool_config(mut self, key: impl Into<String>, kind: PoolKind, conf: PoolConfig) -> Self {
        self.pool_configs.insert(key.into(), (kind, conf));
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Swap the DNS cache (e.g. a disabled one).
    pub fn dns_cache(mut self, cache: DnsCache) -> Self {
        let cache = Arc::new(cache);
        self.resolver = Resolver::new(Some(cache.clone()));
        self.dns_cache = cache;
        self
    }

    pub fn dns_cache_handle(&self) -> Arc<DnsCache> {
        self.dns_cache.clone()
    }

    pub fn proxy_config(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    fn pool_for(&self, key: &str) -> Arc<dyn ConnectionPool> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get(key) {
            return pool.clone();
        }
        let (kind, conf) = self
            .pool_configs
            .get(key)
            .or_else(|| self.pool_configs.get(DEFAULT_POOL_KEY))
            .copied()
            .unwrap_or((PoolKind::Smart, PoolConfig::default()));
        let pool: Arc<dyn ConnectionPool> = match kind {
            PoolKind::Smart => Arc::new(SmartPool::new(conf, self.timeouts)),
            PoolKind::Cyclic => Arc::new(CyclicQueuePool::new(conf, self.timeouts)),
            PoolKind::Websocket => Arc::new(WsPool::new(conf, self.timeouts)),
        };
        debug!(key, ?kind, "created pool");
        pools.insert(key.to_string(), pool.clone());
        pool
    }

    /// Acquire a connected guard for the target URL. A `sock_connect`
    /// overrun releases the permit and surfaces as `ConnectTimeout`.
    pub async fn acquire(
        &self,
        url: &ParsedUrl,
        verify: bool,
        timeouts: &Timeouts,
        http2: bool,
    ) -> Result<ConnGuard> {
        if url.host.is_empty() {
            return Err(Error::HttpParsing("missing hostname".into()));
        }
        let pool_key = format!("{}:{}", url.scheme, url.host);
        let pool = self.pool_for(&pool_key);

        let conn = pool.acquire(Some(&url.host_port_key())).await?;
        let mut guard = ConnGuard::new(conn, pool);

        // With a proxy the transport goes to the proxy authority; the
        // request line then carries the absolute URL.
        let (connect_host, connect_port) = match &self.proxy {
            Some(proxy) => match proxy.host.split_once(':') {
                Some((h, p)) => (
                    h.to_string(),
                    p.parse::<u16>()
                        .map_err(|_| Error::HttpParsing("invalid proxy port".into()))?,
                ),
                None => (proxy.host.clone(), 80),
            },
            None => (url.host.clone(), url.port_or_default()),
        };

        let records = self
            .resolver
            .resolve(&connect_host, connect_port, AddressFamily::Any)
            .await?;
        let record = records
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::Resolve(format!("no addresses for {connect_host}")))?;

        let connect = guard.connect(url, &record, verify, http2);
        match timeouts.sock_connect {
            Some(t) => timeout(t, connect)
                .await
                .map_err(|_| Error::ConnectTimeout)??,
            None => connect.await?,
        }
        Ok(guard)
    }

    /// Close every connection in every pool. Pools are unusable afterwards.
    pub async fn cleanup(&self) {
        let pools: Vec<Arc<dyn ConnectionPool>> =
            self.pools.lock().unwrap().values().cloned().collect();
        for pool in pools {
            pool.cleanup().await;
        }
    }

    /// Poll until every pool reports all connections free.
    pub async fn wait_free_pool(&self) {
        loop {
            let all_free = {
                let pools = self.pools.lock().unwrap();
                pools.values().all(|p| p.is_all_free())
            };
            if all_free {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}
