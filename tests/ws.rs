/*
 * ws.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the WebSocket client against an in-process echo
 * server: handshake validation, masked frame round trips, ping/pong,
 * close, and receive timeouts.
 */

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use corriere::error::Error;
use corriere::http::HttpHeaders;
use corriere::ws::frame::{FrameReader, OP_BINARY, OP_CLOSE, OP_PING, OP_PONG, OP_TEXT};
use corriere::ws::handshake::compute_expected_accept;
use corriere::ws::WebSocketClient;

/// Serialize one unmasked (server-side) frame.
fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x80 | (opcode & 0x0f)];
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len < 65536 {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// Accept one WebSocket client: answer the handshake and echo frames.
/// Text and binary frames bounce back; pings answer with pongs.
async fn ws_echo_server(slow: bool) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((sock, _)) = listener.accept().await else {
            return;
        };
        handle_ws_client(sock, slow).await;
    });
    addr
}

async fn handle_ws_client(mut sock: TcpStream, slow: bool) {
    // Read the upgrade request head.
    let mut head = Vec::new();
    loop {
        let mut tmp = [0u8; 2048];
        let n = match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        head.extend_from_slice(&tmp[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let head_text = String::from_utf8_lossy(&head).to_string();
    let key = head_text
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-key:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let protocol = head_text
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-protocol:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let accept = compute_expected_accept(&key);
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(p) = &protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {p}\r\n"));
    }
    response.push_str("\r\n");
    if sock.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    let (read_half, mut write_half) = sock.split();
    let mut reader = FrameReader::new(read_half, Bytes::new());
    loop {
        let Ok((opcode, payload)) = reader.read_frame().await else {
            return;
        };
        if slow {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let reply = match opcode {
            OP_TEXT => server_frame(OP_TEXT, &payload),
            OP_BINARY => server_frame(OP_BINARY, &payload),
            OP_PING => server_frame(OP_PONG, &payload),
            OP_CLOSE => {
                let _ = write_half.write_all(&server_frame(OP_CLOSE, &payload)).await;
                return;
            }
            _ => continue,
        };
        if write_half.write_all(&reply).await.is_err() {
            return;
        }
    }
}

#[tokio::test]
async fn text_echo_round_trip() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/chat", addr.port()), None, &[])
        .await
        .unwrap();
    assert!(conn.is_connected());
    conn.send_text("hello over ws").await.unwrap();
    let echoed = conn.receive_text(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(echoed, "hello over ws");
}

#[tokio::test]
async fn binary_echo_round_trips_all_length_forms() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();

    for size in [100usize, 200, 70000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        conn.send_bytes(&payload).await.unwrap();
        let echoed = conn.receive_bytes().await.unwrap();
        assert_eq!(echoed.len(), size);
        assert_eq!(&echoed[..], &payload[..]);
    }
}

#[tokio::test]
async fn json_frames_round_trip() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();
    let value = serde_json::json!({"op": "subscribe", "channel": 7});
    conn.send_json(&value).await.unwrap();
    let echoed = conn.receive_json().await.unwrap();
    assert_eq!(echoed, value);
}

#[tokio::test]
async fn ping_answers_with_pong() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();
    conn.ping(b"beat").await.unwrap();
    let pong = conn.receive_pong().await.unwrap();
    assert_eq!(&pong[..], b"beat");
}

#[tokio::test]
async fn subprotocol_is_negotiated() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(
            &format!("ws://127.0.0.1:{}/", addr.port()),
            None,
            &["graphql-ws".to_string(), "fallback".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(conn.subprotocol.as_deref(), Some("graphql-ws"));
}

#[tokio::test]
async fn receive_timeout_raises_read_timeout() {
    let addr = ws_echo_server(true).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();
    conn.send_text("anyone there?").await.unwrap();
    let err = conn
        .receive_text(Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadTimeout));
}

#[tokio::test]
async fn close_tears_down_the_connection() {
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();
    conn.close(1000, "done").await.unwrap();
    assert!(!conn.is_connected());
    assert_eq!(conn.close_code(), Some(1000));
}

#[tokio::test]
async fn handshake_against_plain_http_fails() {
    // A plain HTTP server never answers 101.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let mut tmp = [0u8; 2048];
        let _ = sock.read(&mut tmp).await;
        let _ = sock
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await;
    });
    let client = WebSocketClient::new();
    let err = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn server_closing_mid_frame_is_a_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let mut head = Vec::new();
        loop {
            let mut tmp = [0u8; 2048];
            let n = match sock.read(&mut tmp).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            head.extend_from_slice(&tmp[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let text = String::from_utf8_lossy(&head).to_string();
        let key = text
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-key:"))
            .and_then(|l| l.split(':').nth(1))
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            compute_expected_accept(&key)
        );
        let _ = sock.write_all(response.as_bytes()).await;
        // Announce a 5-byte text frame but send only one byte, then drop.
        let _ = sock.write_all(&[0x81, 0x05, b'x']).await;
    });

    let client = WebSocketClient::new();
    let conn = client
        .connect(&format!("ws://127.0.0.1:{}/", addr.port()), None, &[])
        .await
        .unwrap();
    let err = conn.receive_text(None).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionDisconnected));
}

#[tokio::test]
async fn extra_headers_reach_the_server() {
    // Handshake succeeds regardless; this exercises the header plumbing.
    let addr = ws_echo_server(false).await;
    let client = WebSocketClient::new();
    let mut headers = HttpHeaders::new();
    headers.insert("Authorization", "Bearer token123");
    let conn = client
        .connect(
            &format!("ws://127.0.0.1:{}/", addr.port()),
            Some(headers),
            &[],
        )
        .await
        .unwrap();
    assert!(conn.is_connected());
}
