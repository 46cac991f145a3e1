/*
 * request.rs
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

//! Request assembly: methods, body kinds, head serialization, chunked
//! body framing.

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::http::headers::HttpHeaders;
use crate::http::multipart::MultipartForm;

/// User-Agent sent unless the caller overrides it.
pub const USER_AGENT: &str = concat!("corriere/", env!("CARGO_PKG_VERSION"));

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

/// Lazy request body: yields chunks until None, consumed once. Sent with
/// `Transfer-Encoding: chunked`.
#[async_trait]
pub trait BodyProducer: Send {
    async fn next_chunk(&mut self) -> Option<Bytes>;
}

/// Trivial producer over a synchronous iterator of byte chunks.
pub struct IterBody<I> {
    iter: I,
}

impl<I> IterBody<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

#[async_trait]
impl<I> BodyProducer for IterBody<I>
where
    I: Iterator<Item = Vec<u8>> + Send,
{
    async fn next_chunk(&mut self) -> Option<Bytes> {
        self.iter.next().map(Bytes::from)
    }
}

/// Data accepted by the request builder. Each kind decides its default
/// Content-Type and framing.
pub enum RequestData {
    /// `text/plain`, Content-Length stamped.
    Text(String),
    /// `text/plain`, Content-Length stamped.
    Bytes(Vec<u8>),
    /// URL-encoded pairs, `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// `application/json`.
    Json(serde_json::Value),
    /// `multipart/form-data` with a generated boundary.
    Multipart(MultipartForm),
    /// Lazy producer, `Transfer-Encoding: chunked`.
    Stream(Box<dyn BodyProducer>),
}

/// Everything except unreserved characters is escaped; space becomes '+'.
const FORM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

/// URL-encode form pairs (`a=1&b=two+words`).
pub fn urlencode<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (i, (k, v)) in pairs.into_iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(&utf8_percent_encode(k, FORM).to_string().replace(' ', "+"));
        out.push('=');
        out.push_str(&utf8_percent_encode(v, FORM).to_string().replace(' ', "+"));
    }
    out
}

/// Serialize the request head: request line plus headers in insertion
/// order, terminated by the blank line.
pub fn serialize_head(method: &str, path: &str, headers: &HttpHeaders) -> Vec<u8> {
    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// One chunk in chunked transfer encoding: lower-case hex size line, the
/// payload, CRLF.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Terminator of a chunked body.
pub const CHUNKED_END: &[u8] = b"0\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_head_keeps_order() {
        let mut headers = HttpHeaders::new();
        headers.insert("Host", "example.com");
        headers.insert("Connection", "keep-alive");
        headers.insert("X-One", "1");
        let head = serialize_head("GET", "/x?q=1", &headers);
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("GET /x?q=1 HTTP/1.1\r\n"));
        let host_at = text.find("Host: example.com\r\n").unwrap();
        let conn_at = text.find("Connection: keep-alive\r\n").unwrap();
        let one_at = text.find("X-One: 1\r\n").unwrap();
        assert!(host_at < conn_at && conn_at < one_at);
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn urlencode_escapes_and_pluses() {
        let encoded = urlencode([("a", "1"), ("name", "two words"), ("sym", "a&b=c")]);
        assert_eq!(encoded, "a=1&name=two+words&sym=a%26b%3Dc");
    }

    #[test]
    fn chunk_framing() {
        assert_eq!(encode_chunk(b"foo"), b"3\r\nfoo\r\n");
        assert_eq!(encode_chunk(&[0u8; 26]).split_at(4).0, b"1a\r\n");
        assert_eq!(CHUNKED_END, b"0\r\n\r\n");
    }

    #[tokio::test]
    async fn iter_body_yields_in_order() {
        let mut body = IterBody::new(vec![b"ab".to_vec(), b"cd".to_vec()].into_iter());
        assert_eq!(body.next_chunk().await.unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(body.next_chunk().await.unwrap(), Bytes::from_static(b"cd"));
        assert!(body.next_chunk().await.is_none());
    }
}
