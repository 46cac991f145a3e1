/*
 * sse.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the SSE client against an in-process server:
 * event parsing over chunked transfer, duplicate suppression, and
 * reconnection with Last-Event-ID resumption.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use corriere::error::Error;
use corriere::sse::SseClient;

fn chunk(data: &str) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

const STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Cache-Control: no-cache\r\n\
    Connection: close\r\n\
    Transfer-Encoding: chunked\r\n\r\n";

async fn read_request_head(sock: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    loop {
        let mut tmp = [0u8; 2048];
        let n = match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => n,
        };
        head.extend_from_slice(&tmp[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&head).to_string());
        }
    }
}

fn header_value(head: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name.to_ascii_lowercase());
    head.lines()
        .find(|l| l.to_ascii_lowercase().starts_with(&prefix))
        .and_then(|l| l.split_once(':').map(|(_, v)| v.trim().to_string()))
}

/// Serve a fixed first stream, then resumption streams; record every
/// Last-Event-ID header seen.
async fn sse_server(
    first: Vec<String>,
    resumed: Vec<String>,
    seen_last_ids: Arc<Mutex<Vec<Option<String>>>>,
) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut connection_no = 0usize;
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let Some(head) = read_request_head(&mut sock).await else {
                continue;
            };
            seen_last_ids
                .lock()
                .unwrap()
                .push(header_value(&head, "Last-Event-ID"));

            let events = if connection_no == 0 { &first } else { &resumed };
            connection_no += 1;

            if sock.write_all(STREAM_HEAD).await.is_err() {
                continue;
            }
            for event in events {
                if sock.write_all(&chunk(event)).await.is_err() {
                    break;
                }
            }
            let _ = sock.write_all(b"0\r\n\r\n").await;
            // Drop the socket to end this stream.
        }
    });
    addr
}

#[tokio::test]
async fn events_arrive_in_order() {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let addr = sse_server(
        vec![
            "id: 1\nevent: tick\ndata: one\n\n".into(),
            "id: 2\ndata: two\ndata: more\n\n".into(),
        ],
        vec![],
        ids.clone(),
    )
    .await;

    let client = SseClient::new();
    let mut conn = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    let first = conn.next_event().await.unwrap().unwrap();
    assert_eq!(first.id.as_deref(), Some("1"));
    assert_eq!(first.event.as_deref(), Some("tick"));
    assert_eq!(first.data, "one");

    let second = conn.next_event().await.unwrap().unwrap();
    assert_eq!(second.id.as_deref(), Some("2"));
    assert_eq!(second.data, "two\nmore");

    // reconnect=false: stream end terminates iteration.
    assert!(conn.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_ids_are_skipped() {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let addr = sse_server(
        vec![
            "id: a\ndata: alpha\n\n".into(),
            "id: a\ndata: alpha again\n\n".into(),
            "id: b\ndata: beta\n\n".into(),
        ],
        vec![],
        ids.clone(),
    )
    .await;

    let client = SseClient::new();
    let mut conn = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    let first = conn.next_event().await.unwrap().unwrap();
    assert_eq!(first.data, "alpha");
    let second = conn.next_event().await.unwrap().unwrap();
    assert_eq!(second.data, "beta");
    assert!(conn.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_payload_is_skipped() {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let addr = sse_server(
        vec![
            "data: same\n\n".into(),
            "data: same\n\n".into(),
            "data: different\n\n".into(),
        ],
        vec![],
        ids.clone(),
    )
    .await;

    let client = SseClient::new();
    let mut conn = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    assert_eq!(conn.next_event().await.unwrap().unwrap().data, "same");
    assert_eq!(conn.next_event().await.unwrap().unwrap().data, "different");
    assert!(conn.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn reconnect_resumes_with_last_event_id() {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let addr = sse_server(
        vec![
            "id: 1\ndata: one\n\n".into(),
            "id: 2\ndata: two\n\n".into(),
        ],
        vec![
            // The server replays event 2 after resume; dedup must drop it.
            "id: 2\ndata: two\n\n".into(),
            "id: 3\ndata: three\n\n".into(),
        ],
        ids.clone(),
    )
    .await;

    let client = SseClient::new();
    let mut conn = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            true,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    assert_eq!(conn.next_event().await.unwrap().unwrap().data, "one");
    assert_eq!(conn.next_event().await.unwrap().unwrap().data, "two");
    // Stream ends here; the client reconnects and resumes.
    let resumed = conn.next_event().await.unwrap().unwrap();
    assert_eq!(resumed.id.as_deref(), Some("3"));
    assert_eq!(resumed.data, "three");
    conn.close();
    assert!(conn.next_event().await.unwrap().is_none());

    let seen = ids.lock().unwrap().clone();
    assert_eq!(seen[0], None);
    assert_eq!(seen[1].as_deref(), Some("2"));
}

#[tokio::test]
async fn non_200_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let _ = read_request_head(&mut sock).await;
        let _ = sock
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await;
    });

    let client = SseClient::new();
    let err = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SseConnection(_)));
}

#[tokio::test]
async fn wrong_content_type_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let _ = read_request_head(&mut sock).await;
        let _ = sock
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\n\r\nhi",
            )
            .await;
    });

    let client = SseClient::new();
    let err = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SseConnection(_)));
}

#[tokio::test]
async fn accept_headers_are_sent() {
    let ids = Arc::new(Mutex::new(Vec::<String>::new()));
    let heads = Arc::new(Mutex::new(Vec::<String>::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads_in_task = heads.clone();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        if let Some(head) = read_request_head(&mut sock).await {
            heads_in_task.lock().unwrap().push(head);
        }
        let _ = sock.write_all(STREAM_HEAD).await;
        let _ = sock.write_all(&chunk("data: x\n\n")).await;
        let _ = sock.write_all(b"0\r\n\r\n").await;
    });

    let client = SseClient::new();
    let mut conn = client
        .connect(
            format!("http://127.0.0.1:{}/events", addr.port()),
            None,
            false,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    conn.next_event().await.unwrap();

    let heads = heads.lock().unwrap();
    let head = heads[0].to_ascii_lowercase();
    assert!(head.contains("accept: text/event-stream"));
    assert!(head.contains("cache-control: no-cache"));
    drop(heads);
    let _ = ids;
}
