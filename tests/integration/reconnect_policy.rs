// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the live-channel reconnect policy.
//!
//! These tests run the connection supervisor against a scripted WebSocket
//! server and validate:
//! - An abnormal drop triggers exactly one reconnect attempt after the
//!   fixed delay, and the retry actually re-establishes the channel
//! - A server-initiated normal close (1000) stays down
//! - Dropping the intent sender closes the channel cleanly from our side
//! - Outbound intents are written to the wire; inbound frames come back
//!   decoded, and malformed frames are skipped without killing the stream
//! - A conversation already deleted by the counterpart never dials at all

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairchat::connection::{ConnectionConfig, LinkEvent, spawn_connection};
use pairchat_proto::event::{InboundEvent, OutboundIntent};
use pairchat_proto::message::{ChatId, MessageId};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

const FAST_RETRY: Duration = Duration::from_millis(100);

fn make_config(addr: &str) -> ConnectionConfig {
    ConnectionConfig {
        ws_url: Url::parse(&format!("ws://{addr}")).unwrap(),
        token: "test-token".into(),
        chat_id: ChatId::new(1),
        peer_deleted: false,
        reconnect_delay: FAST_RETRY,
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Wait for a specific `LinkEvent` matching a predicate, with timeout.
/// Skips non-matching events. Panics on timeout or channel close.
async fn wait_for_link<F>(
    rx: &mut mpsc::Receiver<LinkEvent>,
    timeout: Duration,
    description: &str,
    pred: F,
) -> LinkEvent
where
    F: Fn(&LinkEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

async fn wait_for_up(rx: &mut mpsc::Receiver<LinkEvent>) -> LinkEvent {
    wait_for_link(rx, Duration::from_secs(5), "LinkEvent::Up", |evt| {
        matches!(evt, LinkEvent::Up)
    })
    .await
}

#[tokio::test]
async fn abnormal_drop_reconnects_after_fixed_delay() {
    let (listener, addr) = bind().await;

    // Server: accept the first connection and drop it immediately (no close
    // frame), then accept the second and keep it alive.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        let first_drop = tokio::time::Instant::now();
        let (stream, _) = listener.accept().await.unwrap();
        let elapsed = first_drop.elapsed();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Hold the second connection open until the client hangs up.
        while ws.next().await.is_some() {}
        elapsed
    });

    let (_intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    spawn_connection(make_config(&addr), intent_rx, link_tx);

    wait_for_up(&mut link_rx).await;
    let down = wait_for_link(
        &mut link_rx,
        Duration::from_secs(5),
        "LinkEvent::Down",
        |evt| matches!(evt, LinkEvent::Down { .. }),
    )
    .await;
    assert!(
        matches!(down, LinkEvent::Down { will_retry: true }),
        "abnormal drop must announce a retry"
    );

    // The retry establishes a fresh channel.
    wait_for_up(&mut link_rx).await;

    // Tear down so the server task finishes, then check the retry waited
    // for at least the configured delay.
    drop(_intent_tx);
    let elapsed = server.await.unwrap();
    assert!(
        elapsed >= FAST_RETRY,
        "redial came before the fixed delay: {elapsed:?}"
    );
}

#[tokio::test]
async fn server_normal_close_stays_down() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();
        // Drain until the close handshake completes.
        while ws.next().await.is_some() {}

        // Any second connection attempt is a test failure.
        match tokio::time::timeout(Duration::from_millis(500), listener.accept()).await {
            Err(_) => {}
            Ok(_) => panic!("client redialed after a normal close"),
        }
    });

    let (_intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    let handle = spawn_connection(make_config(&addr), intent_rx, link_tx);

    wait_for_up(&mut link_rx).await;
    let down = wait_for_link(
        &mut link_rx,
        Duration::from_secs(5),
        "LinkEvent::Down",
        |evt| matches!(evt, LinkEvent::Down { .. }),
    )
    .await;
    assert!(matches!(down, LinkEvent::Down { will_retry: false }));

    // The supervisor task ends and the event channel closes.
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap();
    assert!(link_rx.recv().await.is_none());
}

#[tokio::test]
async fn dropping_intent_sender_closes_cleanly() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // The client should initiate a normal close.
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(frame))) => {
                    return frame.map(|f| u16::from(f.code));
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    });

    let (intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    spawn_connection(make_config(&addr), intent_rx, link_tx);

    wait_for_up(&mut link_rx).await;
    drop(intent_tx);

    let down = wait_for_link(
        &mut link_rx,
        Duration::from_secs(5),
        "LinkEvent::Down",
        |evt| matches!(evt, LinkEvent::Down { .. }),
    )
    .await;
    assert!(matches!(down, LinkEvent::Down { will_retry: false }));

    let close_code = server.await.unwrap();
    assert_eq!(close_code, Some(1000), "expected a normal close frame");
}

#[tokio::test]
async fn intents_and_frames_flow_both_ways() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // A malformed frame first: the client must skip it.
        ws.send(WsMessage::Text("{broken".into())).await.unwrap();
        // Then a real event.
        ws.send(WsMessage::Text(
            r#"{"type":"new_message","chat_id":1,"id":10,"sender":"bob",
                "content":"live one","timestamp":"2024-05-01T10:00:00Z"}"#
                .into(),
        ))
        .await
        .unwrap();

        // And capture what the client writes.
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected an outbound text frame, got {other:?}"),
            }
        }
    });

    let (intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    spawn_connection(make_config(&addr), intent_rx, link_tx);

    wait_for_up(&mut link_rx).await;

    // The malformed frame is dropped; the next inbound event is the real one.
    let inbound = wait_for_link(
        &mut link_rx,
        Duration::from_secs(5),
        "LinkEvent::Inbound",
        |evt| matches!(evt, LinkEvent::Inbound(_)),
    )
    .await;
    match inbound {
        LinkEvent::Inbound(InboundEvent::NewMessage { id, content, .. }) => {
            assert_eq!(id, MessageId::new(10));
            assert_eq!(content, "live one");
        }
        other => panic!("expected NewMessage, got {other:?}"),
    }

    intent_tx
        .send(OutboundIntent::SendMessage {
            content: "hello".into(),
            reply_to: None,
        })
        .await
        .unwrap();

    let wire = server.await.unwrap();
    assert!(wire.contains(r#""type":"send_message""#));
    assert!(wire.contains(r#""content":"hello""#));
}

#[tokio::test]
async fn dropping_intent_sender_while_redialing_stops_the_supervisor() {
    // Nothing listens here: every dial fails and the supervisor sits in
    // the redial loop without ever opening a socket.
    let config = make_config("127.0.0.1:1");

    let (intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    let handle = spawn_connection(config, intent_rx, link_tx);

    let down = wait_for_link(
        &mut link_rx,
        Duration::from_secs(5),
        "LinkEvent::Down",
        |evt| matches!(evt, LinkEvent::Down { .. }),
    )
    .await;
    assert!(matches!(down, LinkEvent::Down { will_retry: true }));

    // Teardown while the channel is down must end the supervisor instead
    // of letting it redial forever.
    drop(intent_tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor kept redialing after teardown")
        .unwrap();
    // Draining the remaining events ends with a closed channel.
    while let Some(evt) = link_rx.recv().await {
        assert!(
            matches!(evt, LinkEvent::Down { .. }),
            "unexpected event after teardown: {evt:?}"
        );
    }
}

#[tokio::test]
async fn deleted_conversation_never_dials() {
    let (listener, addr) = bind().await;

    let mut config = make_config(&addr);
    config.peer_deleted = true;

    let (_intent_tx, intent_rx) = mpsc::channel::<OutboundIntent>(8);
    let (link_tx, mut link_rx) = mpsc::channel(8);
    let handle = spawn_connection(config, intent_rx, link_tx);

    // The supervisor ends without connecting or emitting anything.
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("supervisor did not stop")
        .unwrap();
    assert!(link_rx.recv().await.is_none());

    match tokio::time::timeout(Duration::from_millis(300), listener.accept()).await {
        Err(_) => {}
        Ok(_) => panic!("a deleted conversation dialed the server"),
    }
}
