/*
 * cache.rs
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

//! DNS answer cache: TTL expiry plus LRU eviction, guarded by one mutex.
//!
//! Keys are preformatted `host:port:family` strings. A hit promotes the
//! key to most-recently-used; an expired entry is removed and counts as a
//! miss. In disabled mode `get` always misses and `set` is a no-op.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Statistics snapshot. Hits and misses are monotonically non-decreasing
/// until `reset_stats`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    /// Hit rate as a percentage, 0 when no lookups were made.
    pub hit_rate: f64,
}

struct Entry {
    addresses: Vec<SocketAddr>,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// LRU order, least recently used at the front.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }

    fn remove(&mut self, key: &str) {
        self.map.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}

/// Thread-safe TTL + LRU cache of resolved address lists.
pub struct DnsCache {
    ttl: Duration,
    max_size: usize,
    disabled: bool,
    inner: Mutex<Inner>,
}

impl DnsCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            disabled: false,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// A disabled cache: `get` always misses, `set` does nothing.
    pub fn disabled() -> Self {
        let mut cache = Self::new(Duration::ZERO, 0);
        cache.disabled = true;
        cache
    }

    /// Store an answer. An existing key is removed first so its recency is
    /// refreshed; at capacity the least-recently-used key is evicted.
    pub fn set(&self, key: &str, addresses: Vec<SocketAddr>, ttl: Option<Duration>) {
        if self.disabled {
            return;
        }
        let expires_at = Instant::now() + ttl.unwrap_or(self.ttl);
        let mut inner = self.inner.lock().unwrap();
        inner.remove(key);
        if inner.map.len() >= self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(
            key.to_string(),
            Entry {
                addresses,
                expires_at,
            },
        );
        inner.order.push_back(key.to_string());
    }

    /// Fetch an answer. Expired entries are deleted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<SocketAddr>> {
        if self.disabled {
            self.inner.lock().unwrap().misses += 1;
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(key) {
            None => {
                inner.misses += 1;
                None
            }
            Some(entry) => {
                if Instant::now() > entry.expires_at {
                    inner.remove(key);
                    inner.misses += 1;
                    None
                } else {
                    let addresses = entry.addresses.clone();
                    inner.touch(key);
                    inner.hits += 1;
                    Some(addresses)
                }
            }
        }
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    /// Number of live entries. Expired entries are pruned before counting.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, e)| now > e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the key is present and not expired. Counts as a lookup.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            max_size: self.max_size,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.hits = 0;
        inner.misses = 0;
    }
}

impl Default for DnsCache {
    /// Defaults match the connector contract: 10 s TTL, 512 entries.
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 512)
    }
}
