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

//! The request engine: verb helpers and a builder that serializes the
//! request, drives the response parse, follows redirects, and composes
//! the timeout budgets.
//!
//! Budget layering: `pool_acquire` wraps the permit wait, `sock_connect`
//! the transport open, `sock_read` the status-line read, and
//! `request_timeout` the whole request including redirects. An inner
//! connect timeout is surfaced as such, never rewritten.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cookie::Cookie;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Timeouts;
use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::http::headers::HttpHeaders;
use crate::http::multipart::MultipartForm;
use crate::http::request::{
    encode_chunk, serialize_head, urlencode, BodyProducer, Method, RequestData, CHUNKED_END,
    USER_AGENT,
};
use crate::http::response::{Compression, HttpResponse};
use crate::pool::ConnGuard;
use crate::url::{ParsedUrl, UrlCache};

const URL_CACHE_SIZE: usize = 512;
const MAX_REDIRECTS: u32 = 30;

/// Asynchronous HTTP client over a shared connector.
pub struct HttpClient {
    connector: Arc<Connector>,
    handle_cookies: bool,
    verify_ssl: bool,
    cookies_map: Mutex<HashMap<String, Vec<Cookie<'static>>>>,
    url_cache: Mutex<UrlCache>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_connector(Connector::new())
    }

    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Arc::new(connector),
            handle_cookies: false,
            verify_ssl: true,
            cookies_map: Mutex::new(HashMap::new()),
            url_cache: Mutex::new(UrlCache::new(URL_CACHE_SIZE)),
        }
    }

    /// Keep response cookies and replay them on requests to the same host.
    pub fn handle_cookies(mut self, enabled: bool) -> Self {
        self.handle_cookies = enabled;
        self
    }

    /// Client-wide certificate verification switch; a per-request `false`
    /// also wins.
    pub fn verify_ssl(mut self, enabled: bool) -> Self {
        self.verify_ssl = enabled;
        self
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Get, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Post, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Put, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Patch, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Delete, url)
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::Head, url)
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            url: url.into(),
            headers: HttpHeaders::new(),
            params: Vec::new(),
            data: None,
            follow: false,
            http2: false,
            verify: true,
            timeouts: None,
        }
    }

    /// Close every pooled connection. The client is unusable afterwards.
    pub async fn shutdown(&self) {
        self.connector.cleanup().await;
    }

    /// Wait until all pending requests are done; false on timeout. Useful
    /// for orderly process shutdown.
    pub async fn wait_requests(&self, limit: Duration) -> bool {
        timeout(limit, self.connector.wait_free_pool()).await.is_ok()
    }

    fn parse_url(&self, url: &str) -> Result<ParsedUrl> {
        self.url_cache.lock().unwrap().parse(url)
    }

    fn add_cookies_to_request(&self, host: &str, headers: &mut HttpHeaders) {
        if headers.contains("Cookie") {
            return;
        }
        let map = self.cookies_map.lock().unwrap();
        if let Some(cookies) = map.get(host) {
            if !cookies.is_empty() {
                let value = cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name(), c.value()))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.insert("Cookie", value);
            }
        }
    }

    fn save_new_cookies(&self, host: &str, response: &HttpResponse) {
        if !response.cookies().is_empty() {
            self.cookies_map
                .lock()
                .unwrap()
                .insert(host.to_string(), response.cookies().to_vec());
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

enum PreparedBody {
    None,
    Full(Bytes),
    Chunked(Box<dyn BodyProducer>),
}

impl std::fmt::Debug for PreparedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreparedBody::None => write!(f, "PreparedBody::None"),
            PreparedBody::Full(b) => f.debug_tuple("PreparedBody::Full").field(b).finish(),
            PreparedBody::Chunked(_) => write!(f, "PreparedBody::Chunked(..)"),
        }
    }
}

/// One request under construction. `send()` executes it.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: String,
    headers: HttpHeaders,
    params: Vec<(String, String)>,
    data: Option<RequestData>,
    follow: bool,
    http2: bool,
    verify: bool,
    timeouts: Option<Timeouts>,
}

impl<'a> RequestBuilder<'a> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Query parameter appended to the URL's own query string.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn data(mut self, data: RequestData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn text(self, body: impl Into<String>) -> Self {
        self.data(RequestData::Text(body.into()))
    }

    pub fn bytes(self, body: impl Into<Vec<u8>>) -> Self {
        self.data(RequestData::Bytes(body.into()))
    }

    /// URL-encoded form body.
    pub fn form(self, pairs: Vec<(String, String)>) -> Self {
        self.data(RequestData::Form(pairs))
    }

    pub fn json(self, value: serde_json::Value) -> Self {
        self.data(RequestData::Json(value))
    }

    pub fn multipart(self, form: MultipartForm) -> Self {
        self.data(RequestData::Multipart(form))
    }

    /// Lazy chunked body, consumed once.
    pub fn body_stream(self, producer: Box<dyn BodyProducer>) -> Self {
        self.data(RequestData::Stream(producer))
    }

    /// Follow 301/302 redirects (up to 30).
    pub fn follow(mut self, enabled: bool) -> Self {
        self.follow = enabled;
        self
    }

    /// Offer h2 in ALPN and use the HTTP/2 handler when negotiated.
    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Per-request timeout budgets; the connector's defaults otherwise.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub async fn send(self) -> Result<HttpResponse> {
        let client = self.client;
        let timeouts = self.timeouts.unwrap_or(client.connector.timeouts);
        let verify = self.verify && client.verify_ssl;
        let urlparsed = client.parse_url(&self.url)?;

        let (headers, mut body) = prepare_body(self.headers, self.data).await?;

        let follow = self.follow;
        let http2 = self.http2;
        let method = self.method;
        let params = self.params;

        let work = async {
            let mut target = urlparsed;
            let mut redirects_left = MAX_REDIRECTS;
            loop {
                let mut attempt_headers = headers.clone();
                if client.handle_cookies {
                    client.add_cookies_to_request(&target.host, &mut attempt_headers);
                }
                let response = do_request(
                    client,
                    &target,
                    method,
                    &attempt_headers,
                    &params,
                    &mut body,
                    verify,
                    &timeouts,
                    http2,
                )
                .await?;

                if client.handle_cookies {
                    client.save_new_cookies(&target.host, &response);
                }

                if follow && matches!(response.status_code(), 301 | 302) {
                    redirects_left -= 1;
                    if redirects_left == 0 {
                        return Err(Error::MaxRedirects);
                    }
                    let location = response
                        .headers
                        .get("location")
                        .ok_or_else(|| Error::HttpParsing("redirect without location".into()))?;
                    debug!(%location, "following redirect");
                    // Cookie replay stays scoped to the redirect target:
                    // each attempt injects the jar for its own host only.
                    target = target.join(location)?;
                    continue;
                }
                return Ok(response);
            }
        };

        match timeouts.request_timeout {
            Some(t) => match timeout(t, work).await {
                Ok(result) => result,
                Err(_) => Err(Error::RequestTimeout),
            },
            None => work.await,
        }
    }
}

/// Turn the builder's data into wire form and stamp the framing headers.
async fn prepare_body(
    mut headers: HttpHeaders,
    data: Option<RequestData>,
) -> Result<(HttpHeaders, PreparedBody)> {
    let body = match data {
        None => PreparedBody::None,
        Some(RequestData::Text(text)) => {
            if !headers.contains("Content-Type") {
                headers.insert("Content-Type", "text/plain");
            }
            headers.replace("Content-Length", text.len().to_string());
            PreparedBody::Full(Bytes::from(text.into_bytes()))
        }
        Some(RequestData::Bytes(bytes)) => {
            if !headers.contains("Content-Type") {
                headers.insert("Content-Type", "text/plain");
            }
            headers.replace("Content-Length", bytes.len().to_string());
            PreparedBody::Full(Bytes::from(bytes))
        }
        Some(RequestData::Form(pairs)) => {
            let encoded = urlencode(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            if !headers.contains("Content-Type") {
                headers.insert("Content-Type", "application/x-www-form-urlencoded");
            }
            headers.replace("Content-Length", encoded.len().to_string());
            PreparedBody::Full(Bytes::from(encoded.into_bytes()))
        }
        Some(RequestData::Json(value)) => {
            let encoded = serde_json::to_vec(&value)
                .map_err(|e| Error::HttpParsing(format!("unserializable json body: {e}")))?;
            headers.replace("Content-Type", "application/json");
            headers.replace("Content-Length", encoded.len().to_string());
            PreparedBody::Full(Bytes::from(encoded))
        }
        Some(RequestData::Multipart(mut form)) => {
            if form.is_empty() {
                return Err(Error::MultipartValue("multipart form has no fields".into()));
            }
            let (bytes, size) = form.get_body_size().await?;
            headers.replace("Content-Type", form.content_type());
            headers.replace("Content-Length", size.to_string());
            PreparedBody::Full(bytes)
        }
        Some(RequestData::Stream(producer)) => {
            headers.replace("Transfer-Encoding", "chunked");
            PreparedBody::Chunked(producer)
        }
    };
    Ok((headers, body))
}

/// One request/response exchange on one pooled connection.
#[allow(clippy::too_many_arguments)]
async fn do_request(
    client: &HttpClient,
    url: &ParsedUrl,
    method: Method,
    headers: &HttpHeaders,
    params: &[(String, String)],
    body: &mut PreparedBody,
    verify: bool,
    timeouts: &Timeouts,
    http2: bool,
) -> Result<HttpResponse> {
    let mut guard = client.connector.acquire(url, verify, timeouts, http2).await?;

    let mut path = url.request_path();
    if !params.is_empty() {
        let encoded = urlencode(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        path = if path.contains('?') {
            format!("{path}&{encoded}")
        } else {
            format!("{path}?{encoded}")
        };
    }

    if guard.is_h2() {
        return h2_request(guard, url, method, headers, &path, body).await;
    }

    let port = url.port_or_default();
    let default_port = if url.is_secure() { 443 } else { 80 };
    let host_header = if port != default_port {
        format!("{}:{}", url.host, port)
    } else {
        url.host.clone()
    };

    let mut head = HttpHeaders::new();
    head.insert("Host", host_header);
    if !headers.contains("Connection") {
        head.insert("Connection", "keep-alive");
    }
    if !headers.contains("User-Agent") {
        head.insert("User-Agent", USER_AGENT);
    }
    if let Some(proxy) = client.connector.proxy_config() {
        if let Some(auth) = &proxy.auth {
            head.insert("Proxy-Authorization", format!("Basic {auth}"));
        }
    }
    for (name, value) in headers.iter() {
        head.insert(name, value);
    }

    // Through a plain proxy the request line carries the absolute URL.
    let target = if client.connector.proxy_config().is_some() && !url.is_secure() {
        format!("{}://{}:{}{}", url.scheme, url.host, port, path)
    } else {
        path
    };

    guard.write(&serialize_head(method.as_str(), &target, &head)).await?;
    match body {
        PreparedBody::None => {}
        PreparedBody::Full(bytes) => guard.write(bytes).await?,
        PreparedBody::Chunked(producer) => {
            while let Some(chunk) = producer.next_chunk().await {
                if chunk.is_empty() {
                    continue;
                }
                guard.write(&encode_chunk(&chunk)).await?;
            }
            guard.write(CHUNKED_END).await?;
        }
    }
    guard.flush().await?;

    // Initial status line bounded by sock_read.
    let line = match timeouts.sock_read {
        Some(t) => timeout(t, guard.readline())
            .await
            .map_err(|_| Error::ReadTimeout)??,
        None => guard.readline().await?,
    };
    if line.is_empty() {
        return Err(Error::ConnectionDisconnected);
    }
    let text = std::str::from_utf8(&line)
        .map_err(|_| Error::HttpParsing("status line not utf-8".into()))?;
    let (version, code, reason) = HttpResponse::parse_status_line(text)?;
    let mut response = HttpResponse::new(version, code, reason);

    // Header lines run until the first line without a colon (blank line).
    loop {
        let line = guard.readline().await?;
        let text = std::str::from_utf8(&line)
            .map_err(|_| Error::HttpParsing("header line not utf-8".into()))?
            .trim_end_matches(['\r', '\n']);
        match HttpHeaders::parse_line(text) {
            Some((name, value)) => response.add_header(name.trim().into(), value.trim().into()),
            None => break,
        }
    }

    let content_length = response
        .headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = response
        .headers
        .get("transfer-encoding")
        .map(|v| v.contains("chunked"))
        .unwrap_or(false);
    let keepalive = !response
        .headers
        .get("connection")
        .unwrap_or("")
        .contains("close");
    response.set_compression(Compression::from_header(
        response.headers.get("content-encoding"),
    ));

    let bodyless = method == Method::Head || code == 204 || code == 304;

    if let Some(n) = content_length {
        if !bodyless && n > 0 {
            let bytes = guard.readexactly(n).await?;
            response.append_raw(&bytes);
        }
    }

    if keepalive {
        guard.keep_alive();
    }

    if chunked && !bodyless {
        response.set_chunked();
        guard.block_until_read_chunks();
        // The caller drains the chunks; the guard rides along blocked.
        response.set_connection(guard);
    } else {
        guard.release();
    }
    Ok(response)
}

/// Dispatch one exchange over the connection's HTTP/2 handler.
async fn h2_request(
    guard: ConnGuard,
    url: &ParsedUrl,
    method: Method,
    headers: &HttpHeaders,
    path: &str,
    body: &mut PreparedBody,
) -> Result<HttpResponse> {
    let mut pairs: Vec<(String, String)> = vec![
        (":method".into(), method.as_str().into()),
        (":authority".into(), url.host.clone()),
        (":scheme".into(), url.scheme.clone()),
        (":path".into(), path.into()),
    ];
    if !headers.contains("user-agent") {
        pairs.push(("user-agent".into(), USER_AGENT.into()));
    }
    for (name, value) in headers.iter() {
        let lower = name.to_ascii_lowercase();
        // Connection-scoped h1 headers do not exist in h2.
        if matches!(lower.as_str(), "host" | "connection" | "transfer-encoding") {
            continue;
        }
        pairs.push((lower, value.to_string()));
    }

    let body_bytes = match body {
        PreparedBody::None => Bytes::new(),
        PreparedBody::Full(bytes) => bytes.clone(),
        PreparedBody::Chunked(producer) => {
            let mut all = Vec::new();
            while let Some(chunk) = producer.next_chunk().await {
                all.extend_from_slice(&chunk);
            }
            Bytes::from(all)
        }
    };

    let mut guard = guard;
    let h2resp = guard.http2_request(pairs, body_bytes).await?;
    guard.keep_alive();
    guard.release();
    HttpResponse::from_h2_parts(h2resp.headers, h2resp.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_text_body_stamps_headers() {
        let (headers, body) = prepare_body(
            HttpHeaders::new(),
            Some(RequestData::Text("hello".into())),
        )
        .await
        .unwrap();
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("Content-Length"), Some("5"));
        assert!(matches!(body, PreparedBody::Full(b) if b == Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn prepare_form_body_urlencodes() {
        let (headers, body) = prepare_body(
            HttpHeaders::new(),
            Some(RequestData::Form(vec![
                ("a".into(), "1".into()),
                ("b".into(), "x y".into()),
            ])),
        )
        .await
        .unwrap();
        assert_eq!(
            headers.get("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        match body {
            PreparedBody::Full(b) => assert_eq!(&b[..], b"a=1&b=x+y"),
            _ => panic!("expected full body"),
        }
    }

    #[tokio::test]
    async fn prepare_json_body() {
        let (headers, body) = prepare_body(
            HttpHeaders::new(),
            Some(RequestData::Json(serde_json::json!({"k": "v"}))),
        )
        .await
        .unwrap();
        assert_eq!(headers.get("Content-Type"), Some("application/json"));
        match body {
            PreparedBody::Full(b) => {
                let v: serde_json::Value = serde_json::from_slice(&b).unwrap();
                assert_eq!(v["k"], "v");
            }
            _ => panic!("expected full body"),
        }
    }

    #[tokio::test]
    async fn prepare_stream_body_sets_chunked() {
        use crate::http::request::IterBody;
        let producer = Box::new(IterBody::new(vec![b"x".to_vec()].into_iter()));
        let (headers, body) =
            prepare_body(HttpHeaders::new(), Some(RequestData::Stream(producer)))
                .await
                .unwrap();
        assert_eq!(headers.get("Transfer-Encoding"), Some("chunked"));
        assert!(matches!(body, PreparedBody::Chunked(_)));
        assert!(!headers.contains("Content-Length"));
    }

    #[tokio::test]
    async fn empty_multipart_is_a_value_error() {
        let err = prepare_body(
            HttpHeaders::new(),
            Some(RequestData::Multipart(MultipartForm::new())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::MultipartValue(_)));
    }

    #[tokio::test]
    async fn caller_content_type_wins() {
        let mut headers = HttpHeaders::new();
        headers.insert("Content-Type", "application/octet-stream");
        let (headers, _) = prepare_body(headers, Some(RequestData::Bytes(vec![1, 2])))
            .await
            .unwrap();
        assert_eq!(headers.get("Content-Type"), Some("application/octet-stream"));
        assert_eq!(headers.get_all("content-type").count(), 1);
    }
}
