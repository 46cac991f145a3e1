/*
 * handler.rs
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

//! HTTP/2 stream handler: hands the negotiated transport to the h2
//! framing library, drives its connection future from a dedicated task,
//! and moves request bodies within the library's flow-control windows.
//!
//! The connection driver is the single consumer of the socket for the
//! life of the connection; it demultiplexes frames into the per-stream
//! response futures. Stream ids, SETTINGS, PING replies, and window
//! accounting are the library's business. This layer maps the client's
//! header pairs onto the library's request type, streams bodies as
//! capacity is granted, and replenishes receive windows as response data
//! is consumed.

use std::future::poll_fn;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use h2::client::{self, SendRequest};
use h2::SendStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::net::HttpStream;

/// How long a body sender waits on an empty flow-control window before
/// the stall is surfaced.
const WINDOW_WAIT: Duration = Duration::from_secs(5);

/// Headers and body of one completed HTTP/2 exchange. The status travels
/// as a `:status` pair; the engine turns this into an HttpResponse.
#[derive(Debug)]
pub struct H2Response {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

fn map_h2_error(e: h2::Error) -> Error {
    if let Some(reason) = e.reason() {
        Error::Connection(format!("http2 peer error: {reason}"))
    } else if e.is_io() {
        Error::Connection(format!("http2 transport error: {e}"))
    } else {
        // The framing library produced a condition this client does not
        // model.
        Error::MissingEvent(e.to_string())
    }
}

/// HTTP/2 handler attached to a connection after ALPN selected h2.
pub struct Http2Handler {
    send_request: SendRequest<Bytes>,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Http2Handler {
    /// Take over the stream: the framing library sends the connection
    /// preface and SETTINGS, and its connection future is spawned as the
    /// reader task.
    pub async fn start(stream: HttpStream) -> Result<Self> {
        let (send_request, connection) = client::handshake(stream).await.map_err(map_h2_error)?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "h2 connection terminated");
            }
        });
        Ok(Self {
            send_request,
            driver: std::sync::Mutex::new(Some(driver)),
        })
    }

    /// Issue one request: open the next stream, send headers (and the
    /// body, window by window), then await the demultiplexed response.
    pub async fn request(
        &mut self,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Result<H2Response> {
        let request = build_request(&headers)?;
        let end_of_stream = body.is_empty();

        // ready() waits until the library will accept a new stream.
        let mut send_request = self
            .send_request
            .clone()
            .ready()
            .await
            .map_err(map_h2_error)?;
        let (response, send_stream) = send_request
            .send_request(request, end_of_stream)
            .map_err(map_h2_error)?;

        if !end_of_stream {
            send_body(send_stream, body).await?;
        }

        let response = response.await.map_err(map_h2_error)?;
        let (parts, mut recv) = response.into_parts();

        let mut pairs = Vec::with_capacity(parts.headers.len() + 1);
        pairs.push((":status".to_string(), parts.status.as_u16().to_string()));
        for (name, value) in parts.headers.iter() {
            pairs.push((
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ));
        }

        let mut collected = BytesMut::new();
        while let Some(chunk) = recv.data().await {
            let chunk = chunk.map_err(map_h2_error)?;
            // Replenish the connection and stream windows by what was
            // consumed so the peer can keep streaming.
            let _ = recv.flow_control().release_capacity(chunk.len());
            collected.extend_from_slice(&chunk);
        }
        if let Some(trailers) = recv.trailers().await.map_err(map_h2_error)? {
            for (name, value) in trailers.iter() {
                pairs.push((
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                ));
            }
        }

        Ok(H2Response {
            headers: pairs,
            body: collected.freeze(),
        })
    }

    /// Cancel the connection driver and absorb its cancellation in the
    /// background. Safe to call multiple times.
    pub fn cleanup(&self) {
        let handle = self.driver.lock().unwrap().take();
        if let Some(task) = handle {
            task.abort();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    let _ = task.await;
                });
            }
        }
    }
}

impl Drop for Http2Handler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Assemble the framing library's request type from pseudo-header pairs.
fn build_request(headers: &[(String, String)]) -> Result<http::Request<()>> {
    let find = |key: &str| {
        headers
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    };
    let method = find(":method")
        .ok_or_else(|| Error::HttpParsing("h2 request without :method".into()))?;
    let authority = find(":authority")
        .ok_or_else(|| Error::HttpParsing("h2 request without :authority".into()))?;
    let scheme = find(":scheme").unwrap_or("https");
    let path = find(":path").unwrap_or("/");

    let mut builder = http::Request::builder()
        .method(method)
        .uri(format!("{scheme}://{authority}{path}"));
    for (name, value) in headers {
        if !name.starts_with(':') {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(())
        .map_err(|e| Error::HttpParsing(format!("malformed h2 request: {e}")))
}

/// Stream the body within the flow-control windows: reserve capacity,
/// wait for the library to grant some, emit the granted slice, repeat.
/// A window that stays empty for the whole guard interval is surfaced as
/// a connection error; the library will not send past the peer's window.
async fn send_body(mut stream: SendStream<Bytes>, mut body: Bytes) -> Result<()> {
    while !body.is_empty() {
        stream.reserve_capacity(body.len());
        let granted = match timeout(WINDOW_WAIT, poll_fn(|cx| stream.poll_capacity(cx))).await {
            Ok(Some(Ok(n))) => n,
            Ok(Some(Err(e))) => return Err(map_h2_error(e)),
            Ok(None) => return Err(Error::ConnectionDisconnected),
            Err(_) => {
                return Err(Error::Connection(
                    "flow-control window stalled without update".into(),
                ))
            }
        };
        if granted == 0 {
            continue;
        }
        let chunk = body.split_to(granted.min(body.len()));
        let end_stream = body.is_empty();
        trace!(len = chunk.len(), end_stream, "sending body chunk");
        stream.send_data(chunk, end_stream).map_err(map_h2_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_maps_pseudo_headers() {
        let pairs = vec![
            (":method".to_string(), "POST".to_string()),
            (":authority".to_string(), "example.com".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":path".to_string(), "/submit?x=1".to_string()),
            ("user-agent".to_string(), "corriere/0.1".to_string()),
            ("content-type".to_string(), "text/plain".to_string()),
        ];
        let request = build_request(&pairs).unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().host(), Some("example.com"));
        assert_eq!(request.uri().path(), "/submit");
        assert_eq!(request.uri().query(), Some("x=1"));
        assert_eq!(
            request.headers().get("user-agent").unwrap(),
            "corriere/0.1"
        );
        assert!(request.headers().get(":path").is_none());
    }

    #[test]
    fn build_request_requires_method_and_authority() {
        let missing_method = vec![(":authority".to_string(), "example.com".to_string())];
        assert!(matches!(
            build_request(&missing_method).unwrap_err(),
            Error::HttpParsing(_)
        ));
        let missing_authority = vec![(":method".to_string(), "GET".to_string())];
        assert!(matches!(
            build_request(&missing_authority).unwrap_err(),
            Error::HttpParsing(_)
        ));
    }
}
