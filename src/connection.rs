/*
 * connection.rs
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

//! One pooled connection: owns the transport, provides the framing-level
//! read/write primitives, and carries the reuse bookkeeping.
//!
//! Reuse rule: a transport is kept across requests while it is bound to
//! the same `host-port` key and has not served `max_conn_requests`.
//! A `blocked` connection is held by a caller that is still streaming the
//! response body; it must not re-enter the pool until drained.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::PoolConfig;
use crate::dns::AddrRecord;
use crate::error::{Error, Result};
use crate::h2::{H2Response, Http2Handler};
use crate::net::{client_tls_config, tls_handshake, HttpStream};
use crate::url::ParsedUrl;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

const FILL_SIZE: usize = 8192;

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("keep", &self.keep)
            .field("blocked", &self.blocked)
            .field("requests_count", &self.requests_count)
            .finish()
    }
}

/// A connection to one remote peer, HTTP/1.1 or HTTP/2.
pub struct Connection {
    id: usize,
    stream: Option<HttpStream>,
    read_buf: BytesMut,

    /// Affinity key `host-port`; None while unbound.
    key: Option<String>,
    temp_key: Option<String>,
    keep: bool,
    blocked: bool,
    requests_count: u64,
    last_released_time: Option<Instant>,
    proxy_connected: bool,
    verify: bool,
    max_conn_requests: Option<u64>,

    h2: Option<Http2Handler>,
}

impl Connection {
    pub fn new(conf: &PoolConfig) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            stream: None,
            read_buf: BytesMut::with_capacity(FILL_SIZE),
            key: None,
            temp_key: None,
            keep: false,
            blocked: false,
            requests_count: 0,
            last_released_time: None,
            proxy_connected: false,
            verify: true,
            max_conn_requests: conf.max_conn_requests,
            h2: None,
        }
    }

    /// Stable identifier, unique per physical connection object.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some() || self.h2.is_some()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn requests_count(&self) -> u64 {
        self.requests_count
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_h2(&self) -> bool {
        self.h2.is_some()
    }

    /// Idle longer than `max_idle` since the last release?
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        match self.last_released_time {
            Some(t) => t.elapsed() > max_idle,
            None => false,
        }
    }

    fn under_request_limit(&self) -> bool {
        self.max_conn_requests
            .map(|max| self.requests_count < max)
            .unwrap_or(true)
    }

    /// Connect to the resolved address, reusing the current transport when
    /// it is bound to the same endpoint and still under the request limit.
    /// On h2 ALPN the transport is handed to a per-connection handler with
    /// its own reader task.
    pub async fn connect(
        &mut self,
        url: &ParsedUrl,
        addr: &AddrRecord,
        verify: bool,
        http2: bool,
    ) -> Result<()> {
        if url.host.is_empty() {
            return Err(Error::HttpParsing("missing hostname".into()));
        }
        let key = url.host_port_key();

        let reusable = self.is_connected()
            && self.key.as_deref() == Some(key.as_str())
            && self.under_request_limit();

        if !reusable {
            self.close();
            let tcp = TcpStream::connect(addr.addr).await?;
            let stream = if url.is_secure() {
                let config = client_tls_config(verify, http2);
                let tls = tls_handshake(tcp, &addr.hostname, config).await?;
                HttpStream::Tls(tls)
            } else {
                HttpStream::Plain(tcp)
            };
            self.verify = verify;
            if stream.negotiated_h2() {
                debug!(conn = self.id, host = %url.host, "negotiated h2");
                self.h2 = Some(Http2Handler::start(stream).await?);
            } else {
                self.stream = Some(stream);
            }
        }
        self.temp_key = Some(key);
        Ok(())
    }

    /// Upgrade an established plain transport to TLS (proxy tunnels).
    pub async fn upgrade(&mut self, host: &str) -> Result<()> {
        let stream = self.stream.take().ok_or(Error::MissingWriter)?;
        let tcp = match stream {
            HttpStream::Plain(tcp) => tcp,
            tls @ HttpStream::Tls(_) => {
                self.stream = Some(tls);
                return Ok(());
            }
        };
        let config = client_tls_config(self.verify, false);
        let tls = tls_handshake(tcp, host, config).await?;
        self.stream = Some(HttpStream::Tls(tls));
        Ok(())
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::MissingWriter)?;
        stream.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::MissingWriter)?;
        stream.flush().await?;
        Ok(())
    }

    /// Read more bytes into the fill buffer. Returns how many arrived;
    /// zero means the peer closed.
    async fn fill(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::MissingReader)?;
        let mut tmp = [0u8; FILL_SIZE];
        let n = stream.read(&mut tmp).await?;
        self.read_buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    /// Read one line including the terminating newline. At EOF whatever is
    /// buffered (possibly nothing) is returned.
    pub async fn readline(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                return Ok(self.read_buf.split_to(pos + 1).freeze());
            }
            if self.fill().await? == 0 {
                return Ok(self.read_buf.split().freeze());
            }
        }
    }

    /// Read exactly `n` bytes; early EOF is a disconnect.
    pub async fn readexactly(&mut self, n: usize) -> Result<Bytes> {
        while self.read_buf.len() < n {
            if self.fill().await? == 0 {
                return Err(Error::ConnectionDisconnected);
            }
        }
        Ok(self.read_buf.split_to(n).freeze())
    }

    /// Read whatever is available, at most one transport read. An empty
    /// result means EOF.
    pub async fn read_some(&mut self) -> Result<Bytes> {
        if self.read_buf.is_empty() {
            self.fill().await?;
        }
        Ok(self.read_buf.split().freeze())
    }

    /// Read through the first occurrence of `sep` (inclusive).
    pub async fn readuntil(&mut self, sep: &[u8]) -> Result<Bytes> {
        loop {
            if let Some(pos) = self
                .read_buf
                .windows(sep.len().max(1))
                .position(|w| w == sep)
            {
                return Ok(self.read_buf.split_to(pos + sep.len()).freeze());
            }
            if self.fill().await? == 0 {
                return Err(Error::ConnectionDisconnected);
            }
        }
    }

    /// Take the transport out of the connection (WebSocket hand-off),
    /// together with any bytes already buffered past the handshake.
    pub fn take_stream(&mut self) -> Result<(HttpStream, Bytes)> {
        let leftover = self.read_buf.split().freeze();
        self.stream
            .take()
            .map(|stream| (stream, leftover))
            .ok_or(Error::MissingReader)
    }

    /// Mark that the response promised keep-alive.
    pub fn keep_alive(&mut self) {
        self.keep = true;
    }

    /// The caller will stream the body; hold this connection out of the
    /// pool until it is drained.
    pub fn block_until_read_chunks(&mut self) {
        self.blocked = true;
    }

    /// Release bookkeeping: one more request served, unblocked, idle clock
    /// restarted. The pool re-inserts the connection separately.
    pub fn mark_released(&mut self) {
        self.requests_count += 1;
        self.blocked = false;
        self.last_released_time = Some(Instant::now());
    }

    /// End-of-scope bookkeeping: a kept connection binds to the endpoint
    /// it just spoke to, an unkept one unbinds and drops any h2 state.
    pub fn finish_scope(&mut self) {
        if self.keep {
            self.key = self.temp_key.take();
            self.keep = false;
        } else {
            self.key = None;
            self.h2 = None;
            self.close();
        }
    }

    /// Abort the transport immediately. No graceful shutdown.
    pub fn close(&mut self) {
        if let Some(h2) = self.h2.take() {
            h2.cleanup();
        }
        self.stream = None;
        self.read_buf.clear();
        self.proxy_connected = false;
    }

    /// Issue a request over the negotiated HTTP/2 handler.
    pub async fn http2_request(
        &mut self,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Result<H2Response> {
        match self.h2.as_mut() {
            Some(handler) => handler.request(headers, body).await,
            None => Err(Error::Connection("connection did not negotiate h2".into())),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    async fn echo_server(payload: &'static [u8]) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(payload).await;
            }
        });
        addr
    }

    fn record(addr: std::net::SocketAddr) -> AddrRecord {
        AddrRecord {
            hostname: "localhost".into(),
            addr,
        }
    }

    fn url_for(addr: std::net::SocketAddr) -> ParsedUrl {
        ParsedUrl::parse(&format!("http://localhost:{}/", addr.port())).unwrap()
    }

    #[tokio::test]
    async fn readline_and_readexactly() {
        let addr = echo_server(b"line one\r\nrest of payload").await;
        let mut conn = Connection::new(&PoolConfig::default());
        conn.connect(&url_for(addr), &record(addr), true, false)
            .await
            .unwrap();
        let line = conn.readline().await.unwrap();
        assert_eq!(&line[..], b"line one\r\n");
        let rest = conn.readexactly(4).await.unwrap();
        assert_eq!(&rest[..], b"rest");
    }

    #[tokio::test]
    async fn readexactly_past_eof_disconnects() {
        let addr = echo_server(b"tiny").await;
        let mut conn = Connection::new(&PoolConfig::default());
        conn.connect(&url_for(addr), &record(addr), true, false)
            .await
            .unwrap();
        let err = conn.readexactly(64).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionDisconnected));
    }

    #[tokio::test]
    async fn readuntil_separator() {
        let addr = echo_server(b"header: value\r\n\r\nbody").await;
        let mut conn = Connection::new(&PoolConfig::default());
        conn.connect(&url_for(addr), &record(addr), true, false)
            .await
            .unwrap();
        let head = conn.readuntil(b"\r\n\r\n").await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
    }

    #[tokio::test]
    async fn io_on_closed_connection_fails() {
        let mut conn = Connection::new(&PoolConfig::default());
        assert!(matches!(
            conn.write(b"x").await.unwrap_err(),
            Error::MissingWriter
        ));
        assert!(matches!(
            conn.readline().await.unwrap_err(),
            Error::MissingReader
        ));
    }

    #[tokio::test]
    async fn finish_scope_keeps_or_unbinds() {
        let addr = echo_server(b"").await;
        let mut conn = Connection::new(&PoolConfig::default());
        let url = url_for(addr);
        conn.connect(&url, &record(addr), true, false).await.unwrap();

        conn.keep_alive();
        conn.mark_released();
        conn.finish_scope();
        assert_eq!(conn.key(), Some(url.host_port_key().as_str()));
        assert!(conn.is_connected());
        assert_eq!(conn.requests_count(), 1);

        conn.finish_scope(); // not kept this time
        assert_eq!(conn.key(), None);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn released_connection_is_unblocked() {
        let mut conn = Connection::new(&PoolConfig::default());
        conn.block_until_read_chunks();
        assert!(conn.is_blocked());
        conn.mark_released();
        assert!(!conn.is_blocked());
        assert!(conn.last_released_time.is_some());
    }
}
