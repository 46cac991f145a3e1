/*
 * lib.rs
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

//! Corriere: asynchronous HTTP/1.1 and HTTP/2 client.
//!
//! The core is the connection and request engine: pooled connections with
//! per-host reuse, a caching resolver with IDNA support, HTTP/1.1 framing
//! with chunked transfer and gzip/deflate decoding, an HTTP/2 stream
//! handler with flow-control-aware sending, a masked WebSocket codec, and
//! a Server-Sent Events parser with reconnection.
//!
//! ```no_run
//! use corriere::HttpClient;
//!
//! # async fn run() -> corriere::Result<()> {
//! let client = HttpClient::new();
//! let mut response = client.get("http://example.com/").send().await?;
//! assert_eq!(response.status_code(), 200);
//! let body = response.text().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod dns;
pub mod error;
pub mod h2;
pub mod http;
pub mod net;
pub mod pool;
pub mod sse;
pub mod url;
pub mod ws;

pub use config::{PoolConfig, PoolKind, Proxy, Timeouts};
pub use connector::Connector;
pub use error::{Error, Result};
pub use http::{
    BodyProducer, HttpClient, HttpHeaders, HttpResponse, IterBody, Method, MultipartFile,
    MultipartForm, RequestData,
};
pub use sse::{SseClient, SseConnection, SseEvent};
pub use ws::{WebSocketClient, WebSocketConnection};
