/*
 * handshake.rs
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

//! WebSocket opening handshake (RFC 6455 §4): the upgrade request and the
//! Sec-WebSocket-Accept verification.

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http::headers::HttpHeaders;

/// Magic string for Sec-WebSocket-Accept (RFC 6455 §4.2.2).
const WS_ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Build the upgrade request. Subprotocols are comma-joined into
/// Sec-WebSocket-Protocol; extra headers follow the standard ones.
pub fn build_handshake_request(
    host: &str,
    port: u16,
    path: &str,
    key_base64: &str,
    subprotocols: &[String],
    extra_headers: &HttpHeaders,
) -> Vec<u8> {
    let host_header = if port == 80 || port == 443 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    };
    let mut req = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key_base64}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    if !subprotocols.is_empty() {
        req.push_str("Sec-WebSocket-Protocol: ");
        req.push_str(&subprotocols.join(", "));
        req.push_str("\r\n");
    }
    for (name, value) in extra_headers.iter() {
        req.push_str(name);
        req.push_str(": ");
        req.push_str(value);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req.into_bytes()
}

/// Expected Sec-WebSocket-Accept for the key we sent:
/// base64(SHA-1(key_base64 + magic GUID)).
pub fn compute_expected_accept(key_base64: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key_base64.as_bytes());
    hasher.update(WS_ACCEPT_MAGIC);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Verify the server's accept header against our key.
pub fn verify_accept(accept_header: Option<&str>, key_base64: &str) -> Result<()> {
    let expected = compute_expected_accept(key_base64);
    match accept_header {
        Some(h) if h.trim() == expected => Ok(()),
        Some(_) => Err(Error::Connection("Sec-WebSocket-Accept mismatch".into())),
        None => Err(Error::Connection("missing Sec-WebSocket-Accept".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_derivation_matches_rfc_example() {
        // RFC 6455 §1.3 example key and accept value.
        let accept = compute_expected_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn verify_accept_paths() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert!(verify_accept(Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), key).is_ok());
        assert!(verify_accept(Some(" s3pPLMBiTxaQ9kYGzzhZRbK+xOo= "), key).is_ok());
        assert!(verify_accept(Some("bogus"), key).is_err());
        assert!(verify_accept(None, key).is_err());
    }

    #[test]
    fn handshake_request_shape() {
        let mut extra = HttpHeaders::new();
        extra.insert("Authorization", "Bearer tok");
        let req = build_handshake_request(
            "example.com",
            9001,
            "/chat",
            "a2V5",
            &["graphql-ws".to_string(), "soap".to_string()],
            &extra,
        );
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9001\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: a2V5\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: graphql-ws, soap\r\n"));
        assert!(text.contains("Authorization: Bearer tok\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn default_ports_omit_port_in_host() {
        let req = build_handshake_request(
            "example.com",
            443,
            "/",
            "k",
            &[],
            &HttpHeaders::new(),
        );
        let text = String::from_utf8(req).unwrap();
        assert!(text.contains("Host: example.com\r\n"));
    }
}
