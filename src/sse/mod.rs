/*
 * mod.rs
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

//! Server-Sent Events: line-oriented event parser over the chunk stream,
//! duplicate suppression, and reconnection with Last-Event-ID resumption.
//!
//! Events are blocks terminated by a blank line. Recognized fields are
//! `data`, `event`, `id`, `retry`; comment lines start with `:`; a bare
//! line directly after a `data` field continues that data.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::headers::HttpHeaders;
use crate::http::{HttpClient, HttpResponse};

/// One parsed event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Event payload; multi-line data is joined with newlines.
    pub data: String,
    pub event: Option<String>,
    pub id: Option<String>,
    /// Server-suggested reconnection delay in milliseconds.
    pub retry: Option<u64>,
}

/// Parse one event block (the text between blank-line delimiters).
pub fn parse_event(block: &str) -> Result<SseEvent> {
    let mut event = SseEvent::default();
    let mut last_field: Option<String> = None;
    for line in block.split('\n') {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(':') {
            continue; // comment
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f.trim(), v.strip_prefix(' ').unwrap_or(v)),
            None => {
                // Bare line: only valid as a continuation of data.
                if last_field.as_deref() == Some("data") {
                    event.data.push_str(line);
                    event.data.push('\n');
                    continue;
                }
                return Err(Error::SseParsing(format!("malformed line: {line:?}")));
            }
        };
        last_field = Some(field.to_string());
        match field {
            "data" => {
                event.data.push_str(value);
                event.data.push('\n');
            }
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "retry" => {
                event.retry = Some(value.parse().map_err(|_| {
                    Error::SseParsing(format!("invalid retry value: {value:?}"))
                })?);
            }
            _ => {}
        }
    }
    if event.data.ends_with('\n') {
        event.data.pop();
    }
    Ok(event)
}

/// SSE client over the HTTP engine.
pub struct SseClient {
    client: HttpClient,
}

impl SseClient {
    pub fn new() -> Self {
        Self {
            client: HttpClient::new(),
        }
    }

    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }

    /// Open an event stream. The request asks for `text/event-stream`
    /// with caching off; anything but a 200 of that content type is a
    /// connection error.
    pub async fn connect(
        &self,
        url: impl Into<String>,
        headers: Option<HttpHeaders>,
        reconnect: bool,
        retry_delay: Duration,
    ) -> Result<SseConnection<'_>> {
        let url = url.into();
        let mut headers = headers.unwrap_or_default();
        if !headers.contains("Accept") {
            headers.insert("Accept", "text/event-stream");
        }
        if !headers.contains("Cache-Control") {
            headers.insert("Cache-Control", "no-cache");
        }

        let response = open_stream(&self.client, &url, &headers).await?;
        Ok(SseConnection {
            client: &self.client,
            url,
            headers,
            response,
            body_taken: false,
            reconnect,
            retry_delay,
            buffer: String::new(),
            last_event_id: None,
            seen_ids: HashSet::new(),
            last_yielded_data: None,
            closed: false,
        })
    }
}

impl Default for SseClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn open_stream(
    client: &HttpClient,
    url: &str,
    headers: &HttpHeaders,
) -> Result<HttpResponse> {
    let mut builder = client.get(url);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| Error::SseConnection(format!("connect failed: {e}")))?;
    if response.status_code() != 200 {
        return Err(Error::SseConnection(format!(
            "endpoint answered {}",
            response.status_code()
        )));
    }
    let ctype = response.headers.get("content-type").unwrap_or("");
    if !ctype.contains("text/event-stream") {
        return Err(Error::SseConnection(format!(
            "endpoint did not return text/event-stream: {ctype:?}"
        )));
    }
    Ok(response)
}

impl std::fmt::Debug for SseConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseConnection")
            .field("url", &self.url)
            .field("reconnect", &self.reconnect)
            .field("closed", &self.closed)
            .finish()
    }
}

/// An open event stream. Call `next_event` until it returns None.
pub struct SseConnection<'a> {
    client: &'a HttpClient,
    url: String,
    headers: HttpHeaders,
    response: HttpResponse,
    body_taken: bool,
    reconnect: bool,
    retry_delay: Duration,
    buffer: String,
    last_event_id: Option<String>,
    seen_ids: HashSet<String>,
    last_yielded_data: Option<String>,
    closed: bool,
}

impl SseConnection<'_> {
    /// Most recent id observed on this logical stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Stop iterating; the underlying connection is dropped.
    pub fn close(&mut self) {
        self.closed = true;
    }

    async fn next_payload(&mut self) -> Result<Option<Bytes>> {
        if self.response.is_chunked() {
            return self.response.read_chunk().await;
        }
        if self.body_taken {
            return Ok(None);
        }
        self.body_taken = true;
        let body = self.response.content().await?;
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }

    /// Yield the next event, skipping duplicates (already-seen ids, or a
    /// payload equal to the previous one). None means the stream is over.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            while let Some(pos) = self.buffer.find("\n\n") {
                let block = self.buffer[..pos].to_string();
                self.buffer.drain(..pos + 2);
                let event = parse_event(&block)?;
                if let Some(id) = &event.id {
                    if self.seen_ids.contains(id) {
                        continue;
                    }
                    self.seen_ids.insert(id.clone());
                    self.last_event_id = Some(id.clone());
                }
                // Replay guard across reconnects.
                if self.last_yielded_data.as_deref() == Some(event.data.as_str()) {
                    continue;
                }
                self.last_yielded_data = Some(event.data.clone());
                return Ok(Some(event));
            }

            match self.next_payload().await? {
                Some(chunk) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                None => {
                    if !self.reconnect {
                        self.closed = true;
                        return Ok(None);
                    }
                    debug!(url = %self.url, "sse stream ended, reconnecting");
                    tokio::time::sleep(self.retry_delay).await;
                    if let Some(id) = &self.last_event_id {
                        self.headers.replace("Last-Event-ID", id.clone());
                    }
                    self.response = open_stream(self.client, &self.url, &self.headers).await?;
                    self.body_taken = false;
                    self.buffer.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_fields() {
        let e = parse_event("event: update\nid: 7\nretry: 2500\ndata: hello").unwrap();
        assert_eq!(e.event.as_deref(), Some("update"));
        assert_eq!(e.id.as_deref(), Some("7"));
        assert_eq!(e.retry, Some(2500));
        assert_eq!(e.data, "hello");
    }

    #[test]
    fn multi_line_data_joins_with_newlines() {
        let e = parse_event("data: first\ndata: second\ndata: third").unwrap();
        assert_eq!(e.data, "first\nsecond\nthird");
    }

    #[test]
    fn trailing_newline_is_stripped_once() {
        let e = parse_event("data: payload").unwrap();
        assert_eq!(e.data, "payload");
        let e = parse_event("data: ").unwrap();
        assert_eq!(e.data, "");
    }

    #[test]
    fn comments_are_ignored() {
        let e = parse_event(": heartbeat\ndata: x").unwrap();
        assert_eq!(e.data, "x");
        assert!(e.event.is_none());
    }

    #[test]
    fn bare_line_continues_data() {
        let e = parse_event("data: first\nsecond half").unwrap();
        assert_eq!(e.data, "first\nsecond half");
    }

    #[test]
    fn bare_line_without_data_is_malformed() {
        let err = parse_event("garbage line").unwrap_err();
        assert!(matches!(err, Error::SseParsing(_)));
        // Bare line after a non-data field is also malformed.
        let err = parse_event("event: tick\nloose").unwrap_err();
        assert!(matches!(err, Error::SseParsing(_)));
    }

    #[test]
    fn non_integer_retry_is_a_parse_error() {
        let err = parse_event("retry: soon").unwrap_err();
        assert!(matches!(err, Error::SseParsing(_)));
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let e = parse_event("data:  double").unwrap();
        assert_eq!(e.data, " double");
        let e = parse_event("data:tight").unwrap();
        assert_eq!(e.data, "tight");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let e = parse_event("custom: x\ndata: y").unwrap();
        assert_eq!(e.data, "y");
    }
}
