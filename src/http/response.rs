/*
 * response.rs
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

//! HTTP response: status, headers, cookies, body access. A chunked
//! response holds its connection (blocked) until the caller drains the
//! chunks; draining releases the connection back to its pool.

use std::io::Read;

use bytes::Bytes;
use cookie::Cookie;
use encoding_rs::Encoding;
use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::{Error, Result};
use crate::http::headers::HttpHeaders;
use crate::pool::ConnGuard;

/// Content-Encoding values the body decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Deflate,
}

impl Compression {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("gzip") => Compression::Gzip,
            Some("deflate") => Compression::Deflate,
            _ => Compression::None,
        }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status_code", &self.status_code)
            .field("version", &self.version)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("chunked", &self.chunked)
            .field("chunks_read", &self.chunks_read)
            .finish()
    }
}

/// A parsed response. Body may be deferred when the transfer was chunked.
pub struct HttpResponse {
    status_code: u16,
    version: String,
    reason: String,
    pub headers: HttpHeaders,
    cookies: Vec<Cookie<'static>>,
    raw_body: Vec<u8>,
    decoded_body: Option<Bytes>,
    compression: Compression,
    chunked: bool,
    chunks_read: bool,
    conn: Option<ConnGuard>,
}

impl HttpResponse {
    pub(crate) fn new(version: String, status_code: u16, reason: String) -> Self {
        Self {
            status_code,
            version,
            reason,
            headers: HttpHeaders::new(),
            cookies: Vec::new(),
            raw_body: Vec::new(),
            decoded_body: None,
            compression: Compression::None,
            chunked: false,
            chunks_read: false,
            conn: None,
        }
    }

    /// Parse `HTTP/<ver> <code> <reason>`; reason may be empty.
    pub(crate) fn parse_status_line(line: &str) -> Result<(String, u16, String)> {
        let line = line.trim_end_matches(['\r', '\n']);
        let rest = line
            .strip_prefix("HTTP/")
            .ok_or_else(|| Error::HttpParsing(format!("bad status line: {line:?}")))?;
        let mut parts = rest.splitn(3, ' ');
        let version = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::HttpParsing(format!("bad status line: {line:?}")))?;
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| Error::HttpParsing(format!("bad status line: {line:?}")))?;
        let reason = parts.next().unwrap_or("").to_string();
        Ok((version.to_string(), code, reason))
    }

    /// Build a response from a completed HTTP/2 exchange.
    pub(crate) fn from_h2_parts(pairs: Vec<(String, String)>, body: Bytes) -> Result<Self> {
        let status = pairs
            .iter()
            .find(|(k, _)| k == ":status")
            .and_then(|(_, v)| v.parse::<u16>().ok())
            .ok_or_else(|| Error::HttpParsing("response without :status".into()))?;
        let mut response = Self::new("2".into(), status, String::new());
        for (name, value) in pairs {
            if !name.starts_with(':') {
                response.add_header(name, value);
            }
        }
        response.compression = Compression::from_header(response.headers.get("content-encoding"));
        response.raw_body = body.to_vec();
        Ok(response)
    }

    pub(crate) fn add_header(&mut self, name: String, value: String) {
        if name.eq_ignore_ascii_case("set-cookie") {
            if let Ok(cookie) = Cookie::parse(value.clone()) {
                self.cookies.push(cookie.into_owned());
            }
        }
        self.headers.insert(name, value);
    }

    pub(crate) fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    pub(crate) fn set_chunked(&mut self) {
        self.chunked = true;
    }

    pub(crate) fn append_raw(&mut self, data: &[u8]) {
        self.raw_body.extend_from_slice(data);
    }

    pub(crate) fn set_connection(&mut self, conn: ConnGuard) {
        self.conn = Some(conn);
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Cookies from Set-Cookie headers, in arrival order.
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    /// Read the next chunk of a chunked body. None after the zero-length
    /// terminator; draining the last chunk releases the connection.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.chunked || self.chunks_read {
            return Ok(None);
        }
        let conn = self.conn.as_mut().ok_or(Error::MissingReader)?;
        let size_line = conn.readline().await?;
        let size_text = std::str::from_utf8(&size_line)
            .map_err(|_| Error::HttpParsing("chunk size not utf-8".into()))?
            .trim();
        let size_hex = size_text.split(';').next().unwrap_or(size_text);
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::HttpParsing(format!("bad chunk size: {size_hex:?}")))?;
        if size == 0 {
            conn.readline().await?; // trailing CRLF
            self.chunks_read = true;
            if let Some(guard) = self.conn.take() {
                guard.release();
            }
            return Ok(None);
        }
        let chunk = conn.readexactly(size + 2).await?;
        Ok(Some(chunk.slice(..size)))
    }

    /// The body bytes, after draining chunks (when not already drained)
    /// and decoding any content encoding.
    pub async fn content(&mut self) -> Result<Bytes> {
        if self.chunked && !self.chunks_read && self.raw_body.is_empty() {
            while let Some(chunk) = self.read_chunk().await? {
                self.raw_body.extend_from_slice(&chunk);
            }
        }
        if self.decoded_body.is_none() {
            let decoded = match self.compression {
                Compression::None => Bytes::from(std::mem::take(&mut self.raw_body)),
                Compression::Gzip => {
                    let mut out = Vec::new();
                    GzDecoder::new(&self.raw_body[..]).read_to_end(&mut out)?;
                    Bytes::from(out)
                }
                Compression::Deflate => {
                    let mut out = Vec::new();
                    ZlibDecoder::new(&self.raw_body[..]).read_to_end(&mut out)?;
                    Bytes::from(out)
                }
            };
            self.decoded_body = Some(decoded);
        }
        Ok(self.decoded_body.clone().unwrap_or_default())
    }

    /// Decode the body to text: `charset=` from Content-Type first, UTF-8
    /// for JSON-like types, charset detection otherwise, UTF-8 as the
    /// last resort.
    pub async fn text(&mut self) -> Result<String> {
        let body = self.content().await?;
        let ctype = self
            .headers
            .get("content-type")
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut encoding: Option<&'static Encoding> = None;
        if let Some(idx) = ctype.find("charset=") {
            let label = ctype[idx + "charset=".len()..]
                .split(|c: char| c == ';' || c.is_whitespace())
                .next()
                .unwrap_or("");
            encoding = Encoding::for_label(label.as_bytes());
        }
        if encoding.is_none() && ctype.contains("application") && ctype.contains("json") {
            encoding = Some(encoding_rs::UTF_8);
        }
        let encoding = encoding.unwrap_or_else(|| {
            let mut detector = chardetng::EncodingDetector::new();
            detector.feed(&body, true);
            detector.guess(None, true)
        });
        let (decoded, _, _) = encoding.decode(&body);
        Ok(decoded.into_owned())
    }

    /// Parse the body as JSON. The response must declare a JSON type.
    pub async fn json(&mut self) -> Result<serde_json::Value> {
        let ctype = self.headers.get("content-type").unwrap_or("");
        if !ctype.to_ascii_lowercase().contains("application/json") {
            return Err(Error::HttpParsing(format!(
                "content-type is not json: {ctype:?}"
            )));
        }
        let body = self.content().await?;
        serde_json::from_slice(&body).map_err(|e| Error::HttpParsing(format!("bad json body: {e}")))
    }
}
