//! Two loopback nodes talking over real WebSocket connections

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{started_node, wait_for_event, MockEngine};
use futures::{SinkExt, StreamExt};
use lanlink_core::protocol::{FileMeta, FileOfferPayload};
use lanlink_core::{
    CallConfig, ChatDirection, ChatKind, DeliveryStatus, HelloPayload, SenderMeta,
};
use lanlink_runtime::{
    AppEvent, CallManager, CallState, LanClient, LanConfig, LanError, LanMessage, LanNode,
    Signal, TodaySummary,
};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn summary() -> TodaySummary {
    TodaySummary {
        total_tasks: 7,
        done_count: 3,
        in_progress_count: 2,
        blocked_count: 1,
        top3_titles: vec!["Ship release".to_string(), "Review".to_string()],
    }
}

async fn raw_connect(port: u16) -> RawSocket {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}", port))
        .await
        .unwrap();
    ws
}

async fn raw_send(ws: &mut RawSocket, message: &LanMessage) {
    ws.send(Message::Text(message.to_json().unwrap()))
        .await
        .unwrap();
}

/// Next decoded message, or `None` once the server closes the connection
async fn raw_next(ws: &mut RawSocket) -> Option<LanMessage> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(LanMessage::decode(&text).unwrap()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server neither replied nor closed")
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_hello_ok_precedes_any_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (node, _events) = started_node("bravo", dir.path()).await;

    let mut ws = raw_connect(node.port()).await;
    raw_send(
        &mut ws,
        &LanMessage::Hello {
            payload: HelloPayload::from_config(&LanConfig::testing()),
        },
    )
    .await;
    raw_send(&mut ws, &LanMessage::Ping).await;

    match raw_next(&mut ws).await {
        Some(LanMessage::HelloOk { payload }) => {
            assert_eq!(payload.app, "WorkQuest");
            assert_eq!(payload.v, "1");
            assert_eq!(payload.device, "bravo");
        }
        other => panic!("expected HELLO_OK first, got {:?}", other),
    }
    assert_eq!(raw_next(&mut ws).await, Some(LanMessage::Pong));
    node.stop().await;
}

#[tokio::test]
async fn test_foreign_app_is_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let (node, _events) = started_node("bravo", dir.path()).await;

    let mut ws = raw_connect(node.port()).await;
    let foreign = HelloPayload {
        app: "OtherApp".to_string(),
        device: "intruder".to_string(),
        v: "1".to_string(),
    };
    raw_send(&mut ws, &LanMessage::Hello { payload: foreign }).await;
    assert_eq!(raw_next(&mut ws).await, None);
    node.stop().await;
}

#[tokio::test]
async fn test_message_before_hello_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (node, _events) = started_node("bravo", dir.path()).await;

    let mut ws = raw_connect(node.port()).await;
    raw_send(&mut ws, &LanMessage::Ping).await;
    assert_eq!(raw_next(&mut ws).await, None);
    node.stop().await;
}

#[tokio::test]
async fn test_client_ping_measures_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, _bravo_events) = started_node("bravo", dir.path()).await;

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    let rtt = alpha.ping(&peer.id).await.unwrap();
    assert!(rtt < Duration::from_secs(2));

    let unknown = lanlink_runtime::PeerId::new("ghost::1");
    assert!(matches!(
        alpha.ping(&unknown).await,
        Err(LanError::PeerNotFound { .. })
    ));
}

// ----------------------------------------------------------------------------
// Today Summary
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_summary_round_trip_through_ui() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", dir.path()).await;
    let bravo = Arc::new(bravo);

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    let responder = {
        let bravo = bravo.clone();
        tokio::spawn(async move {
            let request_id = wait_for_event(&mut bravo_events, |event| match event {
                AppEvent::LocalSummaryRequested { request_id } => Some(request_id),
                _ => None,
            })
            .await;
            bravo.resolve_local_summary(&request_id, summary())
        })
    };

    let received = alpha.get_today_summary(&peer.id).await.unwrap();
    assert_eq!(received, summary());
    assert!(responder.await.unwrap());
}

#[tokio::test]
async fn test_mismatched_summary_reply_is_ignored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _hello = ws.next().await;
        let hello_ok = LanMessage::HelloOk {
            payload: HelloPayload::from_config(&LanConfig::testing()),
        };
        ws.send(Message::Text(hello_ok.to_json().unwrap()))
            .await
            .unwrap();
        let _request = ws.next().await;
        let stray = LanMessage::TodaySummary {
            request_id: "someone-else".to_string(),
            payload: summary(),
        };
        ws.send(Message::Text(stray.to_json().unwrap()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut config = LanConfig::testing();
    config.connect_timeout_ms = 300;
    let client = LanClient::new(&config);
    let err = client
        .request_summary("127.0.0.1", port, "mine")
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_unanswered_local_summary_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, _bravo_events) = started_node("bravo", dir.path()).await;

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, None)
        .await
        .unwrap();
    let err = alpha.get_today_summary(&peer.id).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_stop_fails_pending_summary() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", dir.path()).await;
    let alpha = Arc::new(alpha);

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, None)
        .await
        .unwrap();
    let request = {
        let alpha = alpha.clone();
        tokio::spawn(async move { alpha.get_today_summary(&peer.id).await })
    };
    wait_for_event(&mut bravo_events, |event| {
        matches!(event, AppEvent::LocalSummaryRequested { .. }).then_some(())
    })
    .await;

    alpha.stop().await;
    let result = request.await.unwrap();
    assert!(matches!(result, Err(LanError::Stopped)), "got {:?}", result);
    assert!(!alpha.is_running());
}

// ----------------------------------------------------------------------------
// Chat
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_ack_marks_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, mut alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", dir.path()).await;

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    let sent = alpha.send_chat(&peer.id, "  hello there  ").await.unwrap();
    assert_eq!(sent.text, "hello there");

    let (from_peer, received) = wait_for_event(&mut bravo_events, |event| match event {
        AppEvent::ChatMessageReceived { peer_id, message } => Some((peer_id, message)),
        _ => None,
    })
    .await;
    assert_eq!(received.id, sent.id);
    assert_eq!(received.direction, ChatDirection::In);
    assert_eq!(from_peer.as_str(), format!("manual::127.0.0.1:{}", alpha.port()));
    let contacts = bravo.peers().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].name, "alpha");

    let acked = wait_for_event(&mut alpha_events, |event| match event {
        AppEvent::ChatAck { message_id, .. } => Some(message_id),
        _ => None,
    })
    .await;
    assert_eq!(acked, sent.id);
    let log = alpha.chat_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn test_chat_input_validation() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _events) = started_node("alpha", dir.path()).await;
    let peer = alpha.add_manual_peer("127.0.0.1", 9, None).await.unwrap();

    assert!(matches!(
        alpha.send_chat(&peer.id, "   ").await,
        Err(LanError::InvalidInput { .. })
    ));

    let idle = LanNode::new(LanConfig::testing()).unwrap();
    assert!(matches!(
        idle.send_chat(&peer.id, "hi").await,
        Err(LanError::NotStarted)
    ));
}

// ----------------------------------------------------------------------------
// File Transfer
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_file_round_trip_in_three_chunks() {
    let source = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let (alpha, mut alpha_events) = started_node("alpha", source.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", downloads.path()).await;

    let bytes: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let path = source.path().join("data.bin");
    tokio::fs::write(&path, &bytes).await.unwrap();

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    let entry = alpha.send_file(&peer.id, &path).await.unwrap();
    assert_eq!(entry.kind, ChatKind::File);
    assert_eq!(entry.text, "data.bin");

    let (name, size, file_path) = wait_for_event(&mut bravo_events, |event| match event {
        AppEvent::FileReceived {
            name,
            size,
            file_path,
            ..
        } => Some((name, size, file_path)),
        _ => None,
    })
    .await;
    assert_eq!(name, "data.bin");
    assert_eq!(size, 150_000);
    assert_eq!(file_path, downloads.path().join("data.bin"));
    assert_eq!(tokio::fs::read(&file_path).await.unwrap(), bytes);

    let acked = wait_for_event(&mut alpha_events, |event| match event {
        AppEvent::FileAck { file_id, .. } => Some(file_id),
        _ => None,
    })
    .await;
    assert_eq!(acked, entry.id);
    assert_eq!(alpha.chat_log().await[0].status, DeliveryStatus::Delivered);

    let inbound = bravo.chat_log().await;
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].kind, ChatKind::File);
}

#[tokio::test]
async fn test_stop_closes_connections_and_discards_partial_file() {
    let downloads = tempfile::tempdir().unwrap();
    let (node, mut events) = started_node("alpha", downloads.path()).await;

    let mut ws = raw_connect(node.port()).await;
    raw_send(
        &mut ws,
        &LanMessage::Hello {
            payload: HelloPayload::from_config(&LanConfig::testing()),
        },
    )
    .await;
    assert!(matches!(raw_next(&mut ws).await, Some(LanMessage::HelloOk { .. })));

    let offer = FileOfferPayload {
        file: FileMeta {
            id: "f1".to_string(),
            name: "draft.txt".to_string(),
            size: 10,
            mime: None,
        },
        from: Some(SenderMeta::new("bravo", 4100)),
    };
    raw_send(&mut ws, &LanMessage::FileOffer { payload: offer }).await;
    raw_send(&mut ws, &LanMessage::Ping).await;
    assert_eq!(raw_next(&mut ws).await, Some(LanMessage::Pong));
    let partial = downloads.path().join("draft.txt");
    assert!(partial.exists());

    node.stop().await;
    let (file_id, name) = wait_for_event(&mut events, |event| match event {
        AppEvent::FileTransferFailed { file_id, name, .. } => Some((file_id, name)),
        _ => None,
    })
    .await;
    assert_eq!(file_id, "f1");
    assert_eq!(name, "draft.txt");
    assert!(!partial.exists());
    assert_eq!(raw_next(&mut ws).await, None);
}

#[tokio::test]
async fn test_repeated_name_gets_numbered() {
    let source = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let (alpha, _alpha_events) = started_node("alpha", source.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", downloads.path()).await;

    let path = source.path().join("report.pdf");
    tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();
    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, None)
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        alpha.send_file(&peer.id, &path).await.unwrap();
        let file_path = wait_for_event(&mut bravo_events, |event| match event {
            AppEvent::FileReceived { file_path, .. } => Some(file_path),
            _ => None,
        })
        .await;
        received.push(file_path);
    }
    assert_eq!(received[0], downloads.path().join("report.pdf"));
    assert_eq!(received[1], downloads.path().join("report (1).pdf"));
}

#[tokio::test]
async fn test_directory_is_not_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, _events) = started_node("alpha", dir.path()).await;
    let peer = alpha.add_manual_peer("127.0.0.1", 9, None).await.unwrap();
    assert!(matches!(
        alpha.send_file(&peer.id, dir.path()).await,
        Err(LanError::NotAFile { .. })
    ));
}

// ----------------------------------------------------------------------------
// Call Signaling
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_call_negotiates_across_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, mut alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, mut bravo_events) = started_node("bravo", dir.path()).await;

    let mut alpha_calls = CallManager::new(
        Arc::new(MockEngine::default()),
        alpha.signaling_relay(),
        CallConfig::default(),
    );
    let bravo_calls = CallManager::new(
        Arc::new(MockEngine::default()),
        bravo.signaling_relay(),
        CallConfig::default(),
    );
    let _alpha_call_events = alpha_calls.take_event_receiver();

    let peer = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    alpha_calls.initiate(&peer.id).await.unwrap();

    let (caller, signal) = wait_for_event(&mut bravo_events, |event| match event {
        AppEvent::Signaling { peer_id, signal } => Some((peer_id, signal)),
        _ => None,
    })
    .await;
    bravo_calls.handle_signal(&caller, signal).await;
    assert_eq!(bravo_calls.state().await, CallState::Ringing);
    bravo_calls.answer().await.unwrap();

    let (callee, signal) = wait_for_event(&mut alpha_events, |event| match event {
        AppEvent::Signaling { peer_id, signal } => Some((peer_id, signal)),
        _ => None,
    })
    .await;
    assert_eq!(callee, peer.id);
    alpha_calls.handle_signal(&callee, signal).await;
    assert_eq!(alpha_calls.state().await, CallState::Connected);
}

#[tokio::test]
async fn test_signal_attributed_to_sender_sharing_a_host() {
    let dir = tempfile::tempdir().unwrap();
    let (alpha, mut alpha_events) = started_node("alpha", dir.path()).await;
    let (bravo, _bravo_events) = started_node("bravo", dir.path()).await;
    let (charlie, _charlie_events) = started_node("charlie", dir.path()).await;

    let as_bravo = alpha
        .add_manual_peer("127.0.0.1", bravo.port() as u32, Some("bravo"))
        .await
        .unwrap();
    let as_charlie = alpha
        .add_manual_peer("127.0.0.1", charlie.port() as u32, Some("charlie"))
        .await
        .unwrap();
    let to_alpha = charlie
        .add_manual_peer("127.0.0.1", alpha.port() as u32, Some("alpha"))
        .await
        .unwrap();

    let offer = Signal::Offer {
        sdp: json!("v=0 charlie offer"),
        call_id: "from-charlie".to_string(),
    };
    charlie.send_signaling(&to_alpha.id, offer).await.unwrap();

    let (caller, signal) = wait_for_event(&mut alpha_events, |event| match event {
        AppEvent::Signaling { peer_id, signal } => Some((peer_id, signal)),
        _ => None,
    })
    .await;
    assert_ne!(caller, as_bravo.id);
    assert_eq!(caller, as_charlie.id);
    assert_eq!(signal.call_id(), "from-charlie");

    alpha.stop().await;
    bravo.stop().await;
    charlie.stop().await;
}
