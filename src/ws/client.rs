/*
 * client.rs
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

//! WebSocket client: handshake through the connector, then a connection
//! with independently locked read and write halves so sends and receives
//! can proceed concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{PoolConfig, PoolKind, Timeouts};
use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::http::headers::HttpHeaders;
use crate::net::HttpStream;
use crate::url::ParsedUrl;
use crate::ws::frame::{
    encode_frame, FrameReader, OP_BINARY, OP_CLOSE, OP_PING, OP_PONG, OP_TEXT,
};
use crate::ws::handshake::{build_handshake_request, verify_accept};

/// Client for ws:// and wss:// endpoints.
pub struct WebSocketClient {
    connector: Arc<Connector>,
    timeouts: Timeouts,
}

impl WebSocketClient {
    pub fn new() -> Self {
        Self::with_connector(Connector::with_pool(
            PoolKind::Websocket,
            PoolConfig::default(),
        ))
    }

    pub fn with_connector(connector: Connector) -> Self {
        let timeouts = connector.timeouts;
        Self {
            connector: Arc::new(connector),
            timeouts,
        }
    }

    /// Connect and perform the opening handshake. Fails with a connection
    /// error unless the server answers `HTTP/1.1 101` with a valid
    /// Sec-WebSocket-Accept.
    pub async fn connect(
        &self,
        url: &str,
        headers: Option<HttpHeaders>,
        subprotocols: &[String],
    ) -> Result<WebSocketConnection> {
        let parsed = ParsedUrl::parse(url)?;
        if !matches!(parsed.scheme.as_str(), "ws" | "wss") {
            return Err(Error::HttpParsing(format!(
                "scheme must be ws or wss: {}",
                parsed.scheme
            )));
        }

        let mut guard = self
            .connector
            .acquire(&parsed, true, &self.timeouts, false)
            .await?;

        let mut key_raw = [0u8; 16];
        getrandom::getrandom(&mut key_raw)
            .map_err(|e| Error::Connection(format!("random key: {e}")))?;
        let key_base64 = base64::engine::general_purpose::STANDARD.encode(key_raw);

        let request = build_handshake_request(
            &parsed.host,
            parsed.port_or_default(),
            &parsed.request_path(),
            &key_base64,
            subprotocols,
            &headers.unwrap_or_default(),
        );
        guard.write(&request).await?;
        guard.flush().await?;

        let status_line = guard.readline().await?;
        if !status_line.starts_with(b"HTTP/1.1 101") {
            return Err(Error::Connection(format!(
                "WebSocket upgrade failed: {}",
                String::from_utf8_lossy(&status_line).trim_end()
            )));
        }

        let mut accept: Option<String> = None;
        let mut subprotocol: Option<String> = None;
        loop {
            let line = guard.readline().await?;
            if line.is_empty() {
                return Err(Error::ConnectionDisconnected);
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                break;
            }
            if let Some((name, value)) = HttpHeaders::parse_line(text) {
                if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
                    accept = Some(value.trim().to_string());
                } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
                    subprotocol = Some(value.trim().to_string());
                }
            }
        }
        verify_accept(accept.as_deref(), &key_base64)?;

        let (stream, leftover) = guard.take_stream()?;
        let (read_half, write_half) = tokio::io::split(stream);
        Ok(WebSocketConnection {
            reader: Mutex::new(FrameReader::new(read_half, leftover)),
            writer: Mutex::new(write_half),
            connected: AtomicBool::new(true),
            close_code: std::sync::Mutex::new(None),
            subprotocol,
        })
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new()
    }
}

/// An open WebSocket. Reads and writes serialize under their own locks,
/// so the codec is safe for concurrent senders and one receiver.
impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("connected", &self.connected.load(std::sync::atomic::Ordering::Relaxed))
            .field("subprotocol", &self.subprotocol)
            .finish()
    }
}

pub struct WebSocketConnection {
    reader: Mutex<FrameReader<ReadHalf<HttpStream>>>,
    writer: Mutex<WriteHalf<HttpStream>>,
    connected: AtomicBool,
    close_code: std::sync::Mutex<Option<u16>>,
    /// Subprotocol negotiated during the handshake, if any.
    pub subprotocol: Option<String>,
}

impl WebSocketConnection {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close code recorded when this side sent close.
    pub fn close_code(&self) -> Option<u16> {
        *self.close_code.lock().unwrap()
    }

    async fn send_frame(&self, opcode: u8, payload: &[u8]) -> Result<()> {
        let mut mask_key = [0u8; 4];
        getrandom::getrandom(&mut mask_key)
            .map_err(|e| Error::Connection(format!("random mask: {e}")))?;
        let mut out = BytesMut::with_capacity(14 + payload.len());
        encode_frame(opcode, payload, &mask_key, &mut out)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&out).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_frame(&self) -> Result<(u8, Bytes)> {
        let mut reader = self.reader.lock().await;
        reader.read_frame().await
    }

    pub async fn send_text(&self, message: &str) -> Result<()> {
        self.send_frame(OP_TEXT, message.as_bytes()).await
    }

    pub async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.send_frame(OP_BINARY, data).await
    }

    pub async fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        let encoded = serde_json::to_string(value)
            .map_err(|e| Error::Connection(format!("unserializable json: {e}")))?;
        self.send_text(&encoded).await
    }

    /// Ping with at most 125 payload bytes.
    pub async fn ping(&self, data: &[u8]) -> Result<()> {
        self.send_frame(OP_PING, data).await
    }

    /// Receive a text frame. `limit` bounds the wait; on expiry the read
    /// fails with a read timeout, on EOF with a disconnect.
    pub async fn receive_text(&self, limit: Option<Duration>) -> Result<String> {
        let (opcode, payload) = match limit {
            Some(t) => timeout(t, self.read_frame())
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => self.read_frame().await?,
        };
        if opcode != OP_TEXT {
            return Err(Error::Connection(format!(
                "expected text frame, got opcode {opcode:#x}"
            )));
        }
        String::from_utf8(payload.to_vec())
            .map_err(|_| Error::Connection("text frame not utf-8".into()))
    }

    pub async fn receive_bytes(&self) -> Result<Bytes> {
        let (opcode, payload) = self.read_frame().await?;
        if opcode != OP_BINARY {
            return Err(Error::Connection(format!(
                "expected binary frame, got opcode {opcode:#x}"
            )));
        }
        Ok(payload)
    }

    pub async fn receive_json(&self) -> Result<serde_json::Value> {
        let text = self.receive_text(None).await?;
        serde_json::from_str(&text).map_err(|e| Error::Connection(format!("bad json frame: {e}")))
    }

    pub async fn receive_pong(&self) -> Result<Bytes> {
        let (opcode, payload) = self.read_frame().await?;
        if opcode != OP_PONG {
            return Err(Error::Connection(format!(
                "expected pong frame, got opcode {opcode:#x}"
            )));
        }
        Ok(payload)
    }

    /// Send a close frame (`BE16(code) || reason`) and tear down the
    /// transport.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.send_frame(OP_CLOSE, &payload).await?;
        *self.close_code.lock().unwrap() = Some(code);
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}
