/*
 * config.rs
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

//! Client configuration: timeout budgets, pool sizing, proxy credentials.

use base64::Engine;
use std::time::Duration;

/// Timeout budgets for one request. Each stage has its own budget;
/// `request_timeout` wraps the whole request including redirects and is
/// unset by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on opening the transport (TCP + TLS handshake).
    pub sock_connect: Option<Duration>,
    /// Bound on a single read, including the initial status line.
    pub sock_read: Option<Duration>,
    /// Bound on obtaining a pool permit.
    pub pool_acquire: Option<Duration>,
    /// Bound on the entire request. None means unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sock_connect: Some(Duration::from_secs(5)),
            sock_read: Some(Duration::from_secs(60)),
            pool_acquire: Some(Duration::from_secs(3)),
            request_timeout: None,
        }
    }
}

/// Pool strategy selector. Pool choice is configuration, not a type
/// parameter on the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolKind {
    /// Prefer reusing a connection already bound to the target endpoint.
    #[default]
    Smart,
    /// Strict FIFO rotation regardless of host.
    Cyclic,
    /// Factory for WebSocket connections; no pooling.
    Websocket,
}

/// Sizing and recycling policy for one connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of connections kept by the pool.
    pub size: usize,
    /// Requests served by one connection before it is recycled.
    /// None disables recycling.
    pub max_conn_requests: Option<u64>,
    /// Idle time after which a connection is closed on the next acquire.
    pub max_conn_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 30,
            max_conn_requests: Some(1000),
            max_conn_idle: Duration::from_secs(60),
        }
    }
}

/// HTTP proxy endpoint with optional Basic credentials.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// Proxy authority, `host` or `host:port`.
    pub host: String,
    /// base64("user:password"), ready for a Proxy-Authorization header.
    pub auth: Option<String>,
}

impl Proxy {
    /// `auth` is `user:password` in the clear; it is base64-encoded here.
    pub fn new(host: impl Into<String>, auth: Option<&str>) -> Self {
        Self {
            host: host.into(),
            auth: auth.map(|a| base64::engine::general_purpose::STANDARD.encode(a.as_bytes())),
        }
    }
}
