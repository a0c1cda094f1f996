//! Integration tests driving a [`Server`] from a raw TCP socket.
//!
//! The peer side writes bytes by hand, so these tests control exactly how
//! frames are split across socket deliveries:
//!
//! ```text
//! raw TcpStream ──bytes──► Connection::run ─► Inbox ─► DispatchLoop ─► Recorder
//!                                                                  └─► Archive
//! ```

mod common;

use std::time::Duration;

use common::{next_event, start_server, wait_until, Recorder};
use junction_core::{encode_frame, Message};
use junction_net::{CloseReason, ConnectionError, ServerEvent};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ── Framing over the socket ───────────────────────────────────────────────────

#[tokio::test]
async fn test_ping_split_mid_base64_is_dispatched_once() {
    // Arrange
    let recorder = Recorder::new();
    let (server, mut events, port) = start_server(recorder.clone()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
        panic!("expected a Connected event");
    };
    let frame = encode_frame(&Message::new("/ping", json!({"n": 1}))).unwrap();
    let (first, second) = frame.split_at(frame.len() / 2);

    // Act – two separate deliveries with a pause between them
    peer.write_all(first).await.unwrap();
    peer.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.len(), 0, "half a frame must not be dispatched");
    peer.write_all(second).await.unwrap();

    // Assert
    wait_until("ping dispatched", || server.archive().len() == 1).await;
    assert_eq!(recorder.calls(), vec![("/ping".to_string(), json!({"n": 1}))]);
    assert_eq!(
        server.archive().messages_for(id),
        vec![Message::new("/ping", json!({"n": 1}))]
    );
    server.stop().await;
}

#[tokio::test]
async fn test_back_to_back_frames_in_one_write_arrive_in_order() {
    let recorder = Recorder::new();
    let (server, _events, port) = start_server(recorder.clone()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let mut stream = Vec::new();
    for n in 0..20 {
        stream.extend(encode_frame(&Message::new("/seq", json!(n))).unwrap());
    }
    peer.write_all(&stream).await.unwrap();

    wait_until("all 20 dispatched", || server.archive().len() == 20).await;
    let payloads: Vec<_> = recorder.calls().into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, (0..20).map(|n| json!(n)).collect::<Vec<_>>());
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_and_connection_survives() {
    let recorder = Recorder::new();
    let (server, _events, port) = start_server(recorder.clone()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    peer.write_all(b"not-base64!!\0").await.unwrap();
    peer.write_all(&encode_frame(&Message::new("/after", json!(true))).unwrap())
        .await
        .unwrap();

    wait_until("valid frame dispatched", || recorder.len() == 1).await;
    assert_eq!(recorder.calls()[0].0, "/after");
    assert_eq!(server.connected_count(), 1);
    server.stop().await;
}

// ── Teardown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_notice_closes_without_reaching_handler() {
    // Arrange
    let recorder = Recorder::new();
    let (server, mut events, port) = start_server(recorder.clone()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
        panic!("expected a Connected event");
    };

    // Act
    peer.write_all(&encode_frame(&Message::disconnect_notice()).unwrap())
        .await
        .unwrap();

    // Assert
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::Disconnected {
            id,
            reason: CloseReason::PeerNotice
        }
    );
    assert_eq!(recorder.len(), 0);
    let msg = Message::new("/late", json!(null));
    assert!(!server.send_to(&msg, id).await.unwrap());
    let connection = server.connection(id).expect("closed connections stay registered");
    assert!(matches!(
        connection.send(&msg).await,
        Err(ConnectionError::NotConnected(_))
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_peer_closing_socket_is_reported_as_peer_closed() {
    let (server, mut events, port) = start_server(Recorder::new()).await;
    let peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
        panic!("expected a Connected event");
    };

    drop(peer);

    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::Disconnected {
            id,
            reason: CloseReason::PeerClosed
        }
    );
    assert_eq!(server.connected_count(), 0);
    assert_eq!(server.connections().len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_peer_reset_is_reported_as_transport_error() {
    // Arrange
    let (server, mut events, port) = start_server(Recorder::new()).await;
    let peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    #[allow(deprecated)]
    peer.set_linger(Some(Duration::ZERO)).unwrap();
    let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
        panic!("expected a Connected event");
    };

    // Act – zero linger turns the drop into a connection reset
    drop(peer);

    // Assert
    match next_event(&mut events).await {
        ServerEvent::Disconnected {
            id: closed,
            reason: CloseReason::Transport(_),
        } => assert_eq!(closed, id),
        other => panic!("expected a transport close, got {other:?}"),
    }
    assert_eq!(server.connected_count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_stop_sends_disconnect_notice_to_peers() {
    // Arrange
    let (server, mut events, port) = start_server(Recorder::new()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    next_event(&mut events).await;

    // Act
    server.stop().await;

    // Assert – the peer reads exactly the notice frame, then end of stream
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), peer.read_to_end(&mut received))
        .await
        .expect("server must close the socket")
        .unwrap();
    assert_eq!(received, encode_frame(&Message::disconnect_notice()).unwrap());
}

// ── Handler failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_handler_error_and_panic_do_not_stop_dispatch() {
    let recorder = Recorder::new();
    let (server, _events, port) = start_server(recorder.clone()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    for header in ["/fail", "/panic", "/ok"] {
        peer.write_all(&encode_frame(&Message::new(header, json!(null))).unwrap())
            .await
            .unwrap();
    }

    wait_until("three messages archived", || server.archive().len() == 3).await;
    let headers: Vec<_> = server
        .archive()
        .snapshot()
        .into_iter()
        .map(|entry| entry.message.header().to_string())
        .collect();
    assert_eq!(headers, vec!["/fail", "/panic", "/ok"]);
    assert_eq!(server.connected_count(), 1);
    server.stop().await;
}
